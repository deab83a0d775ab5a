//! User-facing status vocabulary.

pub const PREPARING: &str = "🛜 preparing download";
pub const SLOW_COLLECTION: &str = "⏳ collections take longer, hang on";
pub const DOWNLOADING: &str = "⬇️ downloading";
pub const PROCESSING: &str = "✴️ processing";
pub const SENDING: &str = "❇️ sending";
pub const COLLECTION_DOWNLOADING: &str = "⬇️ collection: downloading";
pub const COLLECTION_PROCESSING: &str = "✴️ collection: processing";
pub const COLLECTION_SENDING: &str = "❇️ collection: sending";
pub const CANCELLED: &str = "❌ cancelled";
pub const NOTHING_TO_CANCEL: &str = "✅ nothing to cancel";
pub const CANCELLED_ALL: &str = "✅ cancelled";
pub const EMPTY_COLLECTION: &str = "❌ error: the collection is empty or could not be read";
pub const NO_SUCH_MEDIA: &str = "❌ error: no such video";
pub const UNRECOGNIZED: &str = "❌ send a YouTube link to a video or a playlist";
pub const START: &str = "👋 send me a YouTube link to a video or a playlist and I'll send back the audio.\n\n/cancel stops everything you asked for.";

pub fn item_failed(title: &str, reason: &str) -> String {
    format!("❌ error while processing '{title}'\n{reason}")
}

pub fn request_failed(reason: &str) -> String {
    format!("❌ error\n{reason}")
}

pub fn collection_done(delivered: usize, failed: usize) -> String {
    if failed == 0 {
        format!("✅ done, collection delivered ({delivered} tracks)")
    } else {
        format!("✅ done, collection delivered ({delivered} tracks, {failed} failed)")
    }
}

pub fn usage(total_uses: u64, distinct_users: u64) -> String {
    format!("📊 used {total_uses} times by {distinct_users} distinct users")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_done_mentions_failures() {
        assert_eq!(collection_done(3, 0), "✅ done, collection delivered (3 tracks)");
        assert!(collection_done(2, 1).contains("1 failed"));
    }
}
