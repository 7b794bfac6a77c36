/// Files ending in this suffix are gzip archives of a plain-text log.
pub const ARCHIVE_SUFFIX: &str = ".gz";

/// How a resolved filesystem entry is going to be served.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ServeMode {
    /// Directories and anything that isn't an archive.
    Generic,
    Archive(Delivery),
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Delivery {
    /// Stream the archive bytes as-is with `Content-Encoding: gzip`.
    Raw,
    /// Decompress on the fly for clients that can't take gzip.
    Decompressed,
}

impl ServeMode {
    pub fn classify(path_name: &str, is_dir: bool, accepts_gzip: bool) -> Self {
        if is_dir || !path_name.ends_with(ARCHIVE_SUFFIX) {
            return ServeMode::Generic;
        }
        if accepts_gzip {
            ServeMode::Archive(Delivery::Raw)
        } else {
            ServeMode::Archive(Delivery::Decompressed)
        }
    }
}

fn is_token_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | ',')
}

/// True if any `Accept-Encoding` value carries a `gzip` token.
///
/// The coding name must be exactly `gzip`; `;q=` parameters are ignored, so
/// neither order nor weight changes the outcome.
pub fn accepts_gzip<'a, I>(values: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    values.into_iter().any(|value| {
        value
            .split(is_token_separator)
            .map(coding_name)
            .any(|coding| coding == "gzip")
    })
}

fn coding_name(token: &str) -> &str {
    token.split(';').next().unwrap_or(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_gzip_token() {
        assert!(accepts_gzip(["gzip"]));
        assert!(accepts_gzip(["deflate, gzip"]));
        assert!(accepts_gzip(["deflate,gzip,br"]));
        assert!(accepts_gzip(["br\tgzip"]));
    }

    #[test]
    fn any_header_instance_counts() {
        assert!(accepts_gzip(["deflate", "br", "gzip"]));
        assert!(!accepts_gzip(["deflate", "br"]));
    }

    #[test]
    fn absent_or_empty_header() {
        assert!(!accepts_gzip(std::iter::empty::<&str>()));
        assert!(!accepts_gzip([""]));
        assert!(!accepts_gzip([" , ,"]));
    }

    #[test]
    fn match_is_exact() {
        assert!(!accepts_gzip(["GZIP"]));
        assert!(!accepts_gzip(["x-gzip"]));
        assert!(!accepts_gzip(["gzipped"]));
        assert!(!accepts_gzip([";gzip"]));
    }

    #[test]
    fn weights_are_irrelevant() {
        assert!(accepts_gzip(["deflate, gzip;q=0.5"]));
        assert!(accepts_gzip(["gzip;q=1.0"]));
        assert!(accepts_gzip(["deflate, gzip ;q=0.5"]));
        assert!(!accepts_gzip(["deflate;q=0.5, br"]));
    }

    #[test]
    fn classify_directory_is_generic() {
        assert_eq!(ServeMode::classify("/logs/a.gz", true, true), ServeMode::Generic);
    }

    #[test]
    fn classify_plain_file_is_generic() {
        assert_eq!(ServeMode::classify("/logs/a.log", false, true), ServeMode::Generic);
        assert_eq!(ServeMode::classify("/logs/a.gzip", false, false), ServeMode::Generic);
    }

    #[test]
    fn classify_archive_by_negotiation() {
        assert_eq!(
            ServeMode::classify("/logs/a.log.gz", false, true),
            ServeMode::Archive(Delivery::Raw)
        );
        assert_eq!(
            ServeMode::classify("/logs/a.log.gz", false, false),
            ServeMode::Archive(Delivery::Decompressed)
        );
    }
}
