/// Name used when an attachment arrives without a usable file name
pub const FALLBACK_FILENAME: &str = "archivo";

const MAX_FILENAME_BYTES: usize = 255;

/// Reduces an uploaded file name to something safe to append to a container path.
///
/// Only the last path component survives (both `/` and `\` count as
/// separators), control and reserved characters become `_`, and the result is
/// cut to 255 bytes on a character boundary.
pub fn sanitize_filename(filename: &str) -> String {
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path components stripped from attachment name: {}", filename);
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    let sanitized = if sanitized.len() > MAX_FILENAME_BYTES {
        let mut end = MAX_FILENAME_BYTES;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized[..end].to_string()
    } else {
        sanitized
    };

    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        FALLBACK_FILENAME.to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("cedula.pdf"), "cedula.pdf");
        assert_eq!(sanitize_filename("my file.doc"), "my file.doc");
        assert_eq!(sanitize_filename("test<script>.pdf"), "test_script_.pdf");
        assert_eq!(sanitize_filename("solicitud ñandú.txt"), "solicitud ñandú.txt");
    }

    #[test]
    fn test_sanitize_strips_paths() {
        assert_eq!(sanitize_filename("../../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..\\..\\windows\\system32"), "system32");
        assert_eq!(sanitize_filename("C:\\Users\\ana\\foto.jpg"), "foto.jpg");
    }

    #[test]
    fn test_sanitize_fallback_and_length() {
        assert_eq!(sanitize_filename(""), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename("dir/"), FALLBACK_FILENAME);
        assert_eq!(sanitize_filename(".."), FALLBACK_FILENAME);

        let long = "é".repeat(200);
        let out = sanitize_filename(&long);
        assert!(out.len() <= 255);
        assert!(out.chars().all(|c| c == 'é'));
    }
}
