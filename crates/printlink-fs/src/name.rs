//! Node name validation and classification.
//!
//! Names travel to the service verbatim, so the rules are the intersection
//! of what common filesystems and the service accept: non-empty, at most
//! 255 bytes, none of the characters that are path separators or shell/FAT
//! metacharacters. A leading dot does not invalidate a name; it marks the
//! node hidden, and hidden nodes are walked internally but never emitted.

use crate::error::FsError;

/// Characters forbidden anywhere in a node name.
pub const FORBIDDEN_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0'];

/// Maximum name length in bytes.
pub const MAX_NAME_BYTES: usize = 255;

/// Extensions the service treats as printable g-code.
pub const GCODE_EXTENSIONS: &[&str] = &["gcode", "gc", "g", "gco"];

/// Validates a single node name.
pub fn validate_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() {
        return Err(FsError::NameInvalid {
            name: name.to_string(),
            reason: "empty",
        });
    }
    if name.len() > MAX_NAME_BYTES {
        return Err(FsError::NameInvalid {
            name: name.to_string(),
            reason: "longer than 255 bytes",
        });
    }
    if name.chars().any(|c| FORBIDDEN_CHARS.contains(&c)) {
        return Err(FsError::NameInvalid {
            name: name.to_string(),
            reason: "forbidden character",
        });
    }
    Ok(())
}

/// A leading dot marks the node hidden.
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// True when the name carries one of the recognised g-code extensions.
pub fn is_gcode(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            GCODE_EXTENSIONS.iter().any(|e| *e == ext)
        }
        _ => false,
    }
}

/// Splits a virtual path into its non-empty components.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        validate_name("benchy.gcode").unwrap();
        validate_name("my part v2 (final).gco").unwrap();
        validate_name(".hidden").unwrap();
    }

    #[test]
    fn rejects_empty() {
        assert!(validate_name("").is_err());
    }

    #[test]
    fn rejects_forbidden_characters() {
        for c in FORBIDDEN_CHARS {
            let name = format!("bad{c}name");
            assert!(validate_name(&name).is_err(), "should reject {c:?}");
        }
    }

    #[test]
    fn rejects_overlong() {
        let name = "x".repeat(MAX_NAME_BYTES + 1);
        assert!(validate_name(&name).is_err());
        let name = "x".repeat(MAX_NAME_BYTES);
        assert!(validate_name(&name).is_ok());
    }

    #[test]
    fn hidden_names() {
        assert!(is_hidden(".secret.gcode"));
        assert!(!is_hidden("visible.gcode"));
    }

    #[test]
    fn gcode_extensions() {
        assert!(is_gcode("a.gcode"));
        assert!(is_gcode("a.GCO"));
        assert!(is_gcode("a.g"));
        assert!(is_gcode("a.gc"));
        assert!(!is_gcode("a.txt"));
        assert!(!is_gcode("gcode"));
        assert!(!is_gcode(".gcode"));
    }

    #[test]
    fn split_path_drops_empty_components() {
        assert_eq!(split_path("/usb/jobs/a.gcode"), vec!["usb", "jobs", "a.gcode"]);
        assert_eq!(split_path("//usb//"), vec!["usb"]);
        assert!(split_path("/").is_empty());
    }

    mod properties {
        use proptest::prelude::*;

        use super::super::*;

        proptest! {
            #[test]
            fn validated_names_have_no_forbidden_chars(name in "\\PC{1,40}") {
                if validate_name(&name).is_ok() {
                    prop_assert!(!name.chars().any(|c| FORBIDDEN_CHARS.contains(&c)));
                    prop_assert!(!name.is_empty());
                    prop_assert!(name.len() <= MAX_NAME_BYTES);
                }
            }

            #[test]
            fn split_never_yields_empty(path in "[a-z/._ ]{0,60}") {
                for component in split_path(&path) {
                    prop_assert!(!component.is_empty());
                }
            }
        }
    }
}
