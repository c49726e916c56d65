use calamine::{Data, Reader, open_workbook_auto};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

use crate::chunker::{Chunker, ChunkerConfig};
use crate::document::Document;
use crate::tabular::{json_cell, render_row};
use crate::IngestError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderOptions {
    /// Table columns left out of rendered rows (e.g. running numbers, references).
    pub ignored_columns: Vec<String>,
    /// Worksheet read from workbooks; the first sheet when unset.
    pub sheet: Option<String>,
    pub chunker: ChunkerConfig,
}

pub struct FileReader {
    options: LoaderOptions,
    chunker: Chunker,
}

impl FileReader {
    pub fn new(options: LoaderOptions) -> Self {
        let chunker = Chunker::new(options.chunker.clone());
        Self { options, chunker }
    }

    pub fn is_supported(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("txt" | "md" | "csv" | "jsonl" | "xlsx" | "xlsm" | "xls" | "ods")
        )
    }

    /// Load a file, or every supported file below a directory.
    pub async fn read_path(&self, path: &Path) -> Result<Vec<Document>, IngestError> {
        if path.is_dir() {
            return self.read_directory(path).await;
        }
        if !path.exists() {
            return Err(IngestError::NotFound(path.to_path_buf()));
        }
        self.read_file(path).await
    }

    pub async fn read_file(&self, path: &Path) -> Result<Vec<Document>, IngestError> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let source = path.to_string_lossy().to_string();

        let documents = match extension {
            "txt" | "md" => self.chunker.chunk_text(&source, &read_text(path).await?),
            "csv" => self.read_csv(&source, &read_text(path).await?)?,
            "jsonl" => self.read_jsonl(&source, &read_text(path).await?)?,
            "xlsx" | "xlsm" | "xls" | "ods" => self.read_workbook(path, &source).await?,
            _ => return Err(IngestError::Unsupported(source)),
        };

        tracing::debug!(source = %source, documents = documents.len(), "loaded file");
        Ok(documents)
    }

    pub async fn read_directory(&self, dir: &Path) -> Result<Vec<Document>, IngestError> {
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| IngestError::Walk(e.to_string()))?;
            if entry.file_type().is_file() && Self::is_supported(entry.path()) {
                files.push(entry.into_path());
            }
        }

        let mut documents = Vec::new();
        for path in files {
            documents.extend(self.read_file(&path).await?);
        }
        Ok(documents)
    }

    fn read_csv(&self, source: &str, content: &str) -> Result<Vec<Document>, IngestError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(content.as_bytes());
        let headers = reader.headers()?.clone();

        let mut documents = Vec::new();
        for (row_idx, record) in reader.records().enumerate() {
            let record = record?;
            let cells = headers.iter().zip(record.iter());
            let text = render_row(cells, &self.options.ignored_columns);
            if !text.is_empty() {
                documents.push(Document::new(source, row_idx, text));
            }
        }
        Ok(documents)
    }

    /// One document per sheet row; the first row holds the column names.
    async fn read_workbook(&self, path: &Path, source: &str) -> Result<Vec<Document>, IngestError> {
        let owned = path.to_path_buf();
        let sheet = self.options.sheet.clone();
        let rows = tokio::task::spawn_blocking(move || load_sheet(&owned, sheet.as_deref()))
            .await
            .map_err(|e| IngestError::Workbook {
                path: path.to_path_buf(),
                message: e.to_string(),
            })??;

        let mut rows = rows.into_iter();
        let Some(header) = rows.next() else {
            return Ok(Vec::new());
        };
        let columns: Vec<String> = header
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                if name.trim().is_empty() {
                    format!("Unnamed: {i}")
                } else {
                    name.trim().to_string()
                }
            })
            .collect();

        let mut documents = Vec::new();
        for (row_idx, row) in rows.enumerate() {
            let cells = columns.iter().map(String::as_str).zip(row.iter().map(String::as_str));
            let text = render_row(cells, &self.options.ignored_columns);
            if !text.is_empty() {
                documents.push(Document::new(source, row_idx, text));
            }
        }
        Ok(documents)
    }

    fn read_jsonl(&self, source: &str, content: &str) -> Result<Vec<Document>, IngestError> {
        let mut documents = Vec::new();
        for (line_idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line)
                .map_err(|error| IngestError::Json {
                    file: source.to_string(),
                    line: line_idx + 1,
                    error,
                })?;

            let flattened: Vec<(String, String)> = row
                .iter()
                .map(|(k, v)| (k.clone(), json_cell(v)))
                .collect();
            let cells = flattened.iter().map(|(k, v)| (k.as_str(), v.as_str()));
            let text = render_row(cells, &self.options.ignored_columns);
            if !text.is_empty() {
                documents.push(Document::new(source, line_idx, text));
            }
        }
        Ok(documents)
    }
}

async fn read_text(path: &Path) -> Result<String, IngestError> {
    fs::read_to_string(path)
        .await
        .map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Every row of `sheet` (or the first sheet) as display strings.
fn load_sheet(path: &Path, sheet: Option<&str>) -> Result<Vec<Vec<String>>, IngestError> {
    let workbook_error = |message: String| IngestError::Workbook {
        path: path.to_path_buf(),
        message,
    };
    let mut workbook = open_workbook_auto(path).map_err(|e| workbook_error(e.to_string()))?;

    let names = workbook.sheet_names();
    let name = match sheet {
        Some(wanted) if names.iter().any(|n| n == wanted) => wanted.to_string(),
        Some(wanted) => {
            return Err(IngestError::MissingSheet {
                path: path.to_path_buf(),
                sheet: wanted.to_string(),
            });
        }
        None => names
            .first()
            .cloned()
            .ok_or_else(|| workbook_error("workbook has no sheets".to_string()))?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| workbook_error(e.to_string()))?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn csv_rows_become_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "diseases.csv",
            "No.,Disease,Cause\n1,Root rot,Phytophthora palmivora\n2,,\n3,Leaf blight,Rhizoctonia\n",
        );
        let reader = FileReader::new(LoaderOptions {
            ignored_columns: vec!["No.".to_string()],
            ..Default::default()
        });

        let docs = reader.read_path(&path).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "1. `Disease`: Root rot\n2. `Cause`: Phytophthora palmivora");
        assert!(docs[1].text.contains("Leaf blight"));
    }

    fn write_workbook(path: &Path) {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let notes = workbook.add_worksheet().set_name("Notes").unwrap();
        notes.write_string(0, 0, "Remark").unwrap();
        notes.write_string(1, 0, "Collected in 2023").unwrap();

        let sheet = workbook.add_worksheet().set_name("Diseases").unwrap();
        for (col, header) in ["No.", "Disease", "Cause", "Year"].into_iter().enumerate() {
            sheet.write_string(0, col as u16, header).unwrap();
        }
        sheet.write_number(1, 0, 1.0).unwrap();
        sheet.write_string(1, 1, "Root rot").unwrap();
        sheet.write_string(1, 2, "Phytophthora palmivora").unwrap();
        sheet.write_number(1, 3, 2019.0).unwrap();
        sheet.write_number(2, 0, 2.0).unwrap();
        sheet.write_number(3, 0, 3.0).unwrap();
        sheet.write_string(3, 1, "Leaf blight").unwrap();
        workbook.save(path).unwrap();
    }

    #[tokio::test]
    async fn workbook_rows_become_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diseases.xlsx");
        write_workbook(&path);
        let reader = FileReader::new(LoaderOptions {
            ignored_columns: vec!["No.".to_string()],
            sheet: Some("Diseases".to_string()),
            ..Default::default()
        });

        let docs = reader.read_path(&path).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(
            docs[0].text,
            "1. `Disease`: Root rot\n2. `Cause`: Phytophthora palmivora\n3. `Year`: 2019"
        );
        assert_eq!(docs[1].text, "1. `Disease`: Leaf blight");
    }

    #[tokio::test]
    async fn workbook_defaults_to_first_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diseases.xlsx");
        write_workbook(&path);

        let docs = FileReader::new(LoaderOptions::default())
            .read_path(&path)
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "1. `Remark`: Collected in 2023");
    }

    #[tokio::test]
    async fn unknown_sheet_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diseases.xlsx");
        write_workbook(&path);
        let reader = FileReader::new(LoaderOptions {
            sheet: Some("Pests".to_string()),
            ..Default::default()
        });

        let err = reader.read_path(&path).await.unwrap_err();
        assert!(matches!(err, IngestError::MissingSheet { ref sheet, .. } if sheet == "Pests"));
    }

    #[tokio::test]
    async fn jsonl_keeps_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "people.jsonl",
            "{\"name\":\"Alice\",\"employer\":\"TechCorp\"}\n\n{\"name\":\"Bob\",\"age\":31}\n",
        );
        let reader = FileReader::new(LoaderOptions::default());

        let docs = reader.read_path(&path).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "1. `name`: Alice\n2. `employer`: TechCorp");
        assert_eq!(docs[1].text, "1. `name`: Bob\n2. `age`: 31");
    }

    #[tokio::test]
    async fn malformed_jsonl_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bad.jsonl", "{\"a\":1}\nnot json\n");
        let reader = FileReader::new(LoaderOptions::default());

        let err = reader.read_path(&path).await.unwrap_err();
        assert!(matches!(err, IngestError::Json { line: 2, .. }));
    }

    #[tokio::test]
    async fn directories_are_walked_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write(dir.path(), "a.txt", "Alice works at TechCorp.");
        write(&dir.path().join("nested"), "b.md", "# Bob\nBob lives in Seattle.");
        write(dir.path(), "ignored.pdf", "binary");

        let reader = FileReader::new(LoaderOptions::default());
        let docs = reader.read_path(dir.path()).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().any(|d| d.text.contains("Seattle")));
    }

    #[tokio::test]
    async fn missing_path_is_an_error() {
        let reader = FileReader::new(LoaderOptions::default());
        let err = reader.read_path(Path::new("/definitely/not/here.txt")).await.unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }
}
