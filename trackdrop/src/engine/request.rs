//! Recognition of media links in free text.

use std::sync::LazyLock;

use regex::Regex;

use super::job::{MediaRequest, RequestKind};

static MEDIA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:https?://)?(?:www\.)?(?:m\.)?(?:youtube\.com|youtu\.be)/(?:watch\?v=|embed/|v/|playlist\?list=|)([\w-]{11}|list=[\w-]{34})(?:\S+)?",
    )
    .expect("media url pattern is valid")
});

impl MediaRequest {
    /// Extract the first recognizable media link from `text`.
    pub fn parse(text: &str) -> Option<Self> {
        let url = MEDIA_URL.find(text)?.as_str().to_string();
        let kind = if url.contains("list=") {
            RequestKind::Collection
        } else {
            RequestKind::Single
        };
        Some(Self { url, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_video_links() {
        for text in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "youtube.com/embed/dQw4w9WgXcQ",
            "https://m.youtube.com/v/dQw4w9WgXcQ?t=10",
        ] {
            let request = MediaRequest::parse(text).unwrap();
            assert_eq!(request.kind, RequestKind::Single, "{text}");
        }
    }

    #[test]
    fn test_first_match_in_text_wins() {
        let request =
            MediaRequest::parse("listen to this https://youtu.be/dQw4w9WgXcQ and https://youtu.be/aaaaaaaaaaa")
                .unwrap();
        assert_eq!(request.url, "https://youtu.be/dQw4w9WgXcQ");
    }

    #[test]
    fn test_collection_links() {
        let request = MediaRequest::parse(
            "https://www.youtube.com/playlist?list=PLrAXtmErZgOeiKm4sgNOknGvNjby9efdf",
        )
        .unwrap();
        assert_eq!(request.kind, RequestKind::Collection);

        let request = MediaRequest::parse(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PLrAXtmErZgOeiKm4sgNOknGvNjby9efdf",
        )
        .unwrap();
        assert_eq!(request.kind, RequestKind::Collection);
    }

    #[test]
    fn test_unrecognized_text() {
        assert!(MediaRequest::parse("hello there").is_none());
        assert!(MediaRequest::parse("https://vimeo.com/123456").is_none());
        assert!(MediaRequest::parse("https://youtu.be/short").is_none());
    }
}
