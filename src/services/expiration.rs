//! Upload expiration policy (tus `expiration` extension).

use crate::models::upload::Upload;
use chrono::{DateTime, Duration, Utc};

/// Pattern used for the `Upload-Expires` response header.
pub const EXPIRES_PATTERN: &str = "%Y-%m-%d %H:%M:%S";

/// Longest accepted upload lifetime, one hundred years.
pub const MAX_DURATION_DAYS: i64 = 36_500;

/// Uploads expire a fixed number of days after they were created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirationPolicy {
    duration: Duration,
}

impl ExpirationPolicy {
    /// Days outside `0..=MAX_DURATION_DAYS` are clamped into that range.
    pub fn new(duration_days: i64) -> Self {
        Self {
            duration: Duration::days(duration_days.clamp(0, MAX_DURATION_DAYS)),
        }
    }

    pub fn duration_days(&self) -> i64 {
        self.duration.num_days()
    }

    pub fn expires_at(&self, upload: &Upload) -> DateTime<Utc> {
        upload
            .created_at
            .checked_add_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, upload: &Upload) -> bool {
        self.is_expired_at(upload, Utc::now())
    }

    /// Expired strictly after the deadline; the deadline instant itself is still valid.
    pub fn is_expired_at(&self, upload: &Upload, now: DateTime<Utc>) -> bool {
        now > self.expires_at(upload)
    }

    pub fn header_value(&self, upload: &Upload) -> String {
        self.expires_at(upload).format(EXPIRES_PATTERN).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn upload_created_at(created_at: DateTime<Utc>) -> Upload {
        Upload {
            id: 1,
            mime_type: String::new(),
            content_length: 10,
            content_offset: 0,
            last_uploaded_chunk_number: 0,
            original_name: "a.bin".into(),
            fingerprint: "fp".into(),
            partial_status: false,
            metadata: String::new(),
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn deadline_is_created_at_plus_duration() {
        let created = Utc.with_ymd_and_hms(2024, 2, 27, 8, 30, 0).unwrap();
        let policy = ExpirationPolicy::new(3);
        let upload = upload_created_at(created);

        assert_eq!(
            policy.expires_at(&upload),
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap()
        );
        assert_eq!(policy.header_value(&upload), "2024-03-01 08:30:00");
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let policy = ExpirationPolicy::new(1);
        let upload = upload_created_at(created);
        let deadline = policy.expires_at(&upload);

        assert!(!policy.is_expired_at(&upload, created));
        assert!(!policy.is_expired_at(&upload, deadline));
        assert!(policy.is_expired_at(&upload, deadline + Duration::seconds(1)));
    }

    #[test]
    fn oversized_duration_is_clamped() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let policy = ExpirationPolicy::new(200_000_000);
        let upload = upload_created_at(created);

        assert_eq!(policy.duration_days(), MAX_DURATION_DAYS);
        assert!(!policy.is_expired(&upload));
        assert_eq!(
            policy.expires_at(&upload),
            created + Duration::days(MAX_DURATION_DAYS)
        );
    }

    #[test]
    fn deadline_saturates_near_the_end_of_time() {
        let upload = upload_created_at(DateTime::<Utc>::MAX_UTC - Duration::days(1));
        let policy = ExpirationPolicy::new(7);

        assert_eq!(policy.expires_at(&upload), DateTime::<Utc>::MAX_UTC);
        assert!(!policy.is_expired(&upload));
    }
}
