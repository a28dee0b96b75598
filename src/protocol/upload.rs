//! Binary public values in multipart calls.
//!
//! File values are lifted out of the JSON body and sent as form parts named
//! by their path in the envelope tree:
//!
//! ```text
//! public.avatar                 root instance, field `avatar`
//! children.1.public.attachment  second child, field `attachment`
//! ```
//!
//! The server puts each part back where it came from as a tagged file
//! value, so the widget sees the same shape either way.

use thiserror::Error;

use super::CallBody;
use crate::{
    codec::tagged::{FileUpload, Tagged, is_file},
    envelope::Envelope,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("invalid upload part name `{0}`")]
    InvalidPath(String),
}

/// Remove file values from every envelope, returning them with their paths.
pub fn take_files(body: &mut CallBody) -> Vec<(String, FileUpload)> {
    let mut files = Vec::new();
    take_from(&mut body.envelope, String::new(), &mut files);
    files
}

fn take_from(envelope: &mut Envelope, prefix: String, files: &mut Vec<(String, FileUpload)>) {
    let fields: Vec<String> = envelope
        .public
        .iter()
        .filter(|(_, value)| is_file(value))
        .map(|(field, _)| field.clone())
        .collect();

    for field in fields {
        if let Some(value) = envelope.public.shift_remove(&field)
            && let Some(Tagged::File(file)) = Tagged::from_value(&value)
        {
            files.push((format!("{prefix}public.{field}"), file));
        }
    }

    for (index, child) in envelope.children.iter_mut().enumerate() {
        take_from(child, format!("{prefix}children.{index}."), files);
    }
}

/// Whether any envelope in the body carries a file value.
pub fn has_files(body: &CallBody) -> bool {
    fn walk(envelope: &Envelope) -> bool {
        envelope.public.values().any(is_file) || envelope.children.iter().any(walk)
    }
    walk(&body.envelope)
}

/// Put one uploaded part back into the envelope tree.
pub fn restore_file(body: &mut CallBody, path: &str, file: FileUpload) -> Result<(), UploadError> {
    let invalid = || UploadError::InvalidPath(path.to_string());

    let mut node = &mut body.envelope;
    let mut rest = path;
    while let Some(tail) = rest.strip_prefix("children.") {
        let (index, tail) = tail.split_once('.').ok_or_else(invalid)?;
        let index: usize = index.parse().map_err(|_| invalid())?;
        node = node.children.get_mut(index).ok_or_else(invalid)?;
        rest = tail;
    }

    let field = rest.strip_prefix("public.").ok_or_else(invalid)?;
    if field.is_empty() {
        return Err(invalid());
    }
    node.public
        .insert(field.to_string(), Tagged::File(file).to_value());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::TargetPath;
    use serde_json::{Map, json};

    fn upload(name: &str) -> FileUpload {
        FileUpload {
            name: name.into(),
            mime: "image/png".into(),
            bytes: vec![1, 2, 3],
        }
    }

    fn body() -> CallBody {
        let mut root = Map::new();
        root.insert("title".into(), json!("x"));
        root.insert("avatar".into(), Tagged::File(upload("a.png")).to_value());
        let mut child = Map::new();
        child.insert("scan".into(), Tagged::File(upload("b.png")).to_value());

        CallBody {
            envelope: Envelope::new("root", root)
                .with_child(Envelope::new("c0", Map::new()))
                .with_child(Envelope::new("c1", child)),
            args: vec![],
            target: TargetPath::root(),
        }
    }

    #[test]
    fn test_take_then_restore() {
        let original = body();
        let mut stripped = original.clone();
        assert!(has_files(&stripped));

        let files = take_files(&mut stripped);
        let paths: Vec<_> = files.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, ["public.avatar", "children.1.public.scan"]);
        assert!(!has_files(&stripped));
        assert_eq!(stripped.envelope.public["title"], "x");

        for (path, file) in files {
            restore_file(&mut stripped, &path, file).unwrap();
        }
        assert_eq!(stripped.envelope.children, original.envelope.children);
        assert_eq!(stripped.envelope.public["avatar"], original.envelope.public["avatar"]);
    }

    #[test]
    fn test_bad_paths_rejected() {
        let mut b = body();
        for path in ["avatar", "children.9.public.x", "children.x.public.y", "public."] {
            assert!(restore_file(&mut b, path, upload("z")).is_err(), "{path}");
        }
    }
}
