//! Canonical quality tags and the bucketing rule used by stream responses.
//!
//! A record's `quality` is one of five canonical tags (`720p`, `1080p`,
//! `1080p 10bit`, `2160p`, `2160p 10bit`), optionally suffixed with source
//! annotations such as `(⚠️cam)` or a guessed-match marker. Bucketing works
//! on the canonical prefix so annotated tags land in the right bucket.

/// Warning suffix for cam-sourced releases.
pub const ANNOTATION_CAM: &str = "(⚠️cam)";
/// Warning suffix for telesync-sourced releases.
pub const ANNOTATION_TELESYNC: &str = "(⚠️telesync)";
/// Suffix for web-sourced releases (only attached when the indexer reports
/// the source type explicitly).
pub const ANNOTATION_WEB: &str = "(web)";
/// Suffix attached by scrape indexers that cannot guarantee an exact match.
pub const ANNOTATION_GUESSED: &str = "(❓guessed)";

/// The five canonical quality buckets, in the order stream responses list
/// them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QualityBucket {
    Q720p,
    Q1080p,
    Q1080p10bit,
    Q2160p,
    Q2160p10bit,
}

impl QualityBucket {
    pub const ALL: [QualityBucket; 5] = [
        QualityBucket::Q720p,
        QualityBucket::Q1080p,
        QualityBucket::Q1080p10bit,
        QualityBucket::Q2160p,
        QualityBucket::Q2160p10bit,
    ];

    /// Bucket a quality tag by its canonical prefix. The 10bit checks must
    /// run before the plain ones since `1080p 10bit …` starts with `1080p`
    /// too.
    pub fn of(quality: &str) -> Option<QualityBucket> {
        let ten_bit = quality.contains("10bit");
        if quality.starts_with("1080p") {
            Some(if ten_bit {
                QualityBucket::Q1080p10bit
            } else {
                QualityBucket::Q1080p
            })
        } else if quality.starts_with("2160p") {
            Some(if ten_bit {
                QualityBucket::Q2160p10bit
            } else {
                QualityBucket::Q2160p
            })
        } else if quality.starts_with("720p") {
            Some(QualityBucket::Q720p)
        } else {
            None
        }
    }

    /// The canonical tag, as shown to users.
    pub fn tag(&self) -> &'static str {
        match self {
            QualityBucket::Q720p => "720p",
            QualityBucket::Q1080p => "1080p",
            QualityBucket::Q1080p10bit => "1080p 10bit",
            QualityBucket::Q2160p => "2160p",
            QualityBucket::Q2160p10bit => "2160p 10bit",
        }
    }

    /// The tag as used inside fingerprints. Episode ids already carry `:`,
    /// so fingerprints avoid a second separator charset and use `.` instead
    /// of a space.
    pub fn fingerprint_tag(&self) -> &'static str {
        match self {
            QualityBucket::Q720p => "720p",
            QualityBucket::Q1080p => "1080p",
            QualityBucket::Q1080p10bit => "1080p.10bit",
            QualityBucket::Q2160p => "2160p",
            QualityBucket::Q2160p10bit => "2160p.10bit",
        }
    }
}

fn has_token(name_lower: &str, tokens: &[&str]) -> bool {
    name_lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|t| tokens.contains(&t))
}

/// Derive the canonical quality tag from a release name. Returns `None` when
/// the name carries no recognizable resolution; such releases are not worth
/// offering.
pub fn parse_quality(release_name: &str) -> Option<String> {
    let lower = release_name.to_lowercase();

    let resolution = if lower.contains("2160p") || has_token(&lower, &["4k", "uhd"]) {
        "2160p"
    } else if lower.contains("1080p") {
        "1080p"
    } else if lower.contains("720p") {
        "720p"
    } else {
        return None;
    };

    let mut quality = String::from(resolution);
    if lower.contains("10bit") || lower.contains("10-bit") || has_token(&lower, &["hi10"]) {
        quality.push_str(" 10bit");
    }

    if has_token(&lower, &["cam", "camrip", "hdcam"]) {
        quality.push(' ');
        quality.push_str(ANNOTATION_CAM);
    } else if has_token(&lower, &["ts", "hdts", "telesync"]) {
        quality.push(' ');
        quality.push_str(ANNOTATION_TELESYNC);
    }

    Some(quality)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quality_resolutions() {
        assert_eq!(
            parse_quality("Big.Buck.Bunny.1080p.BluRay.x264").as_deref(),
            Some("1080p")
        );
        assert_eq!(
            parse_quality("Some Show S01E02 720p WEB h264").as_deref(),
            Some("720p")
        );
        assert_eq!(
            parse_quality("Movie.2021.2160p.HDR.x265").as_deref(),
            Some("2160p")
        );
        assert_eq!(parse_quality("Movie.2021.4K.UHD").as_deref(), Some("2160p"));
        assert_eq!(parse_quality("Movie.2021.DVDRip"), None);
    }

    #[test]
    fn test_parse_quality_ten_bit() {
        assert_eq!(
            parse_quality("Movie.2160p.HDR.10bit.x265").as_deref(),
            Some("2160p 10bit")
        );
        assert_eq!(
            parse_quality("Movie 1080p 10-bit HEVC").as_deref(),
            Some("1080p 10bit")
        );
    }

    #[test]
    fn test_parse_quality_annotations() {
        assert_eq!(
            parse_quality("Movie.2024.1080p.HDCAM.x264").as_deref(),
            Some("1080p (⚠️cam)")
        );
        assert_eq!(
            parse_quality("Movie.2024.720p.HDTS").as_deref(),
            Some("720p (⚠️telesync)")
        );
        // Words merely containing the token letters must not trigger.
        assert_eq!(
            parse_quality("Camelot.1080p.BluRay").as_deref(),
            Some("1080p")
        );
        assert_eq!(
            parse_quality("Hearts.720p.BluRay").as_deref(),
            Some("720p")
        );
    }

    #[test]
    fn test_bucket_order_and_prefix_match() {
        assert_eq!(QualityBucket::of("720p"), Some(QualityBucket::Q720p));
        assert_eq!(
            QualityBucket::of("720p (web)"),
            Some(QualityBucket::Q720p)
        );
        assert_eq!(
            QualityBucket::of("1080p 10bit (❓guessed)"),
            Some(QualityBucket::Q1080p10bit)
        );
        assert_eq!(QualityBucket::of("1080p"), Some(QualityBucket::Q1080p));
        assert_eq!(
            QualityBucket::of("2160p 10bit"),
            Some(QualityBucket::Q2160p10bit)
        );
        assert_eq!(QualityBucket::of("480p"), None);

        let tags: Vec<&str> = QualityBucket::ALL.iter().map(|b| b.tag()).collect();
        assert_eq!(
            tags,
            vec!["720p", "1080p", "1080p 10bit", "2160p", "2160p 10bit"]
        );
    }

    #[test]
    fn test_fingerprint_tags() {
        assert_eq!(QualityBucket::Q1080p10bit.fingerprint_tag(), "1080p.10bit");
        assert_eq!(QualityBucket::Q2160p.fingerprint_tag(), "2160p");
    }
}
