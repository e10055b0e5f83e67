//! Text and JSON rendering of command results.

use anyhow::Result;
use caslake_core::{ContentHash, Entry, Fields};
use serde::Serialize;
use std::io::{self, Write};

/// Prints command results to stdout and errors to stderr.
pub struct OutputWriter {
    json: bool,
}

impl OutputWriter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Pretty JSON for `data`, or the string from `text_fn` in text mode.
    fn render<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<String> {
        if self.json {
            Ok(format!("{}\n", serde_json::to_string_pretty(data)?))
        } else {
            Ok(text_fn())
        }
    }

    pub fn write<T: Serialize>(&self, data: &T, text_fn: impl FnOnce() -> String) -> Result<()> {
        let rendered = self.render(data, text_fn)?;
        io::stdout().lock().write_all(rendered.as_bytes())?;
        Ok(())
    }

    /// Report a failed command, with the full `anyhow` context chain.
    pub fn write_error(&self, error: &anyhow::Error, result_code: u8) {
        let failure = ErrorOutput {
            success: false,
            result_code,
            error: format!("{:#}", error),
        };
        let rendered = self
            .render(&failure, || format!("Error: {}\n", failure.error))
            .unwrap_or_else(|_| format!("Error: {}\n", failure.error));
        let _ = io::stderr().lock().write_all(rendered.as_bytes());
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub result_code: u8,
    pub error: String,
}

/// Output for `init` command.
#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub result_code: u8,
    pub root: String,
    pub base_dir: String,
}

/// A committed entry as shown to users.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub content_hash: ContentHash,
    pub file_extension: String,
    pub path: String,
    pub fields: Fields,
}

impl EntryInfo {
    /// Build from a committed entry and its stored path.
    pub fn new(entry: &Entry<Fields>, path: String) -> Option<Self> {
        Some(Self {
            content_hash: *entry.content_hash()?,
            file_extension: entry.file_extension().to_string(),
            path,
            fields: entry.fields().clone(),
        })
    }

    /// One-line text rendering: hash, extension and fields.
    pub fn to_line(&self) -> String {
        let fields = serde_json::Value::Object(self.fields.clone());
        format!(
            "{}{} {}\n",
            self.content_hash, self.file_extension, fields
        )
    }
}

/// Output for `put` command.
#[derive(Debug, Serialize)]
pub struct PutOutput {
    pub success: bool,
    pub result_code: u8,
    pub entries: Vec<EntryInfo>,
}

/// Output for `migrate` command.
#[derive(Debug, Serialize)]
pub struct MigrateOutput {
    pub success: bool,
    pub result_code: u8,
    pub source: String,
    pub files: usize,
    pub bytes: u64,
}

/// Output for `select` command.
#[derive(Debug, Serialize)]
pub struct SelectOutput {
    pub success: bool,
    pub result_code: u8,
    pub entries: Vec<EntryInfo>,
}

/// Output for `path` command.
#[derive(Debug, Serialize)]
pub struct PathOutput {
    pub success: bool,
    pub result_code: u8,
    pub paths: Vec<String>,
}

/// Output for `link` command.
#[derive(Debug, Serialize)]
pub struct LinkOutput {
    pub success: bool,
    pub result_code: u8,
    pub destination: String,
    pub links: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Fields::new(),
        }
    }

    #[test]
    fn test_render_modes() {
        let data = PathOutput {
            success: true,
            result_code: 0,
            paths: vec!["store/a.txt".to_string()],
        };

        let text = OutputWriter::new(false)
            .render(&data, || "store/a.txt\n".to_string())
            .unwrap();
        assert_eq!(text, "store/a.txt\n");

        let json = OutputWriter::new(true)
            .render(&data, || panic!("text renderer used in JSON mode"))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["paths"][0], json!("store/a.txt"));
    }

    #[test]
    fn test_uncommitted_entry_has_no_info() {
        let entry = Entry::new(".txt", fields(json!({ "name": "a" })));
        assert!(EntryInfo::new(&entry, "x".to_string()).is_none());
    }

    #[test]
    fn test_entry_info_json_shape() {
        let info = EntryInfo {
            content_hash: ContentHash::hash_bytes(b"3"),
            file_extension: ".txt".to_string(),
            path: "store/x.txt".to_string(),
            fields: fields(json!({ "name": "3" })),
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(
            value["content_hash"],
            json!("jydubblcx3nywygoaxa55t7dvulloirqsz66ah3ebn7eoknut7ha")
        );
        assert_eq!(value["fields"]["name"], json!("3"));
        assert_eq!(
            info.to_line(),
            "jydubblcx3nywygoaxa55t7dvulloirqsz66ah3ebn7eoknut7ha.txt {\"name\":\"3\"}\n"
        );
    }
}
