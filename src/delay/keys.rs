//! Sorted-set key layout.
//!
//! Each bucket owns a pending and a claimed set. Both carry the same hash tag so the
//! scripts that move members between them stay on one cluster slot.

/// Bucket for an item firing at `fire_at`
pub fn bucket_of(fire_at: i64, bucket_count: u32) -> u32 {
    fire_at.rem_euclid(i64::from(bucket_count.max(1))) as u32
}

/// Example: `{kafka:delay:queue:3}:pending`
pub fn pending_key(prefix: &str, bucket: u32) -> String {
    format!("{{{}:{}}}:pending", prefix, bucket)
}

/// Example: `{kafka:delay:queue:3}:claimed`
pub fn claimed_key(prefix: &str, bucket: u32) -> String {
    format!("{{{}:{}}}:claimed", prefix, bucket)
}
