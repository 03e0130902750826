// SPDX-License-Identifier: MIT OR Apache-2.0
//! Collecting a chain's iteration domain (chunks, rows, or image groups)
//! from its configured connector, and building each unit's ambient
//! interpolation context.

use crate::config::{ImagesConfig, InputMode, InputsConfig, SplitterConfig, TableConfig, TextColumnConfig};
use fmf_connect::{Connector, Selector};
use fmf_core::{Chunk, Document, ImageGroup, TableRow};
use fmf_error::FmfError;
use fmf_ids::chunk_id;
use fmf_split::{chunk_text, iter_table_rows, TextColumn};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A single unit of work fed through a chain's steps.
#[derive(Debug, Clone)]
pub enum InputUnit {
    /// A text chunk, plus the document it came from.
    Chunk(Chunk),
    /// A tabular row.
    Row(TableRow),
    /// A fixed-size group of image blobs.
    Group(ImageGroup),
}

/// Every document loaded for the primary input domain, and the units
/// derived from them.
#[derive(Debug, Clone, Default)]
pub struct InputCollections {
    /// Every document read from the configured connector.
    pub documents: Vec<Document>,
    /// Iteration units derived from `documents` per `inputs.mode`.
    pub units: Vec<InputUnit>,
}

fn splitter_of(config: SplitterConfig) -> Option<fmf_split::Splitter> {
    match config {
        SplitterConfig::BySentence => Some(fmf_split::Splitter::BySentence),
        SplitterConfig::ByParagraph => Some(fmf_split::Splitter::ByParagraph),
        SplitterConfig::None => None,
    }
}

fn text_column_of(config: Option<&TableConfig>) -> TextColumn {
    match config.and_then(|t| t.text_column.as_ref()) {
        None => TextColumn::None,
        Some(TextColumnConfig::Single(col)) => TextColumn::Single(col.clone()),
        Some(TextColumnConfig::Joined(cols)) => TextColumn::Joined(cols.clone()),
    }
}

async fn load_documents(connector: &dyn Connector, select: &[String]) -> Result<Vec<Document>, FmfError> {
    let selector = Selector { include: select.to_vec(), exclude: Vec::new() };
    let refs = connector.list(&selector).await?;
    let mut documents = Vec::with_capacity(refs.len());
    for resource in refs {
        let data = connector.open(&resource).await?;
        let doc = fmf_loader::load_document_from_bytes(&resource.uri, &resource.name, &data)?;
        documents.push(doc);
    }
    Ok(documents)
}

fn chunk_documents(documents: &[Document], config: &InputsConfig) -> Vec<InputUnit> {
    let Some(splitter) = splitter_of(config.splitter) else {
        return documents
            .iter()
            .filter_map(|doc| {
                let text = doc.text.as_ref()?;
                Some(InputUnit::Chunk(Chunk {
                    id: chunk_id(&doc.id, 0, text),
                    doc_id: doc.id.clone(),
                    source_uri: doc.source_uri.clone(),
                    text: text.clone(),
                    provenance: fmf_core::ChunkProvenance { index: 0, splitter: "none", length_chars: text.chars().count() },
                }))
            })
            .collect();
    };

    documents
        .iter()
        .filter_map(|doc| doc.text.as_ref().map(|text| (doc, text)))
        .flat_map(|(doc, text)| {
            chunk_text(&doc.id, text, config.chunk_max_tokens, config.chunk_overlap, splitter)
                .into_iter()
                .map(move |mut chunk| {
                    chunk.source_uri = doc.source_uri.clone();
                    InputUnit::Chunk(chunk)
                })
        })
        .collect()
}

fn rows_from_table(documents: &[Document], table: Option<&TableConfig>) -> Result<Vec<InputUnit>, FmfError> {
    let text_column = text_column_of(table);
    let pass_through = table.and_then(|t| t.pass_through.as_deref());
    let mut units = Vec::new();
    for doc in documents {
        let filename = doc.metadata.get("filename").and_then(Value::as_str).unwrap_or(&doc.source_uri);
        let raw = doc.text.clone().unwrap_or_default();
        let rows = iter_table_rows(&doc.source_uri, filename, raw.as_bytes(), pass_through, &text_column)?;
        units.extend(rows.into_iter().map(|mut row| {
            row.doc_id = Some(doc.id.clone());
            InputUnit::Row(row)
        }));
    }
    Ok(units)
}

/// Synthesize table rows from chain-file-inline data (`mode: dataframe_rows`).
///
/// There is no backing file, so each row is given a pseudo source URI
/// (`inline://row/<index>`) and an id hashed from its serialized content.
fn rows_from_inline(rows: &[BTreeMap<String, Value>]) -> Vec<InputUnit> {
    rows.iter()
        .enumerate()
        .map(|(index, values)| {
            let source_uri = format!("inline://row/{index}");
            let payload = serde_json::to_string(values).unwrap_or_default();
            let text = values.values().find_map(Value::as_str).map(str::to_string);
            InputUnit::Row(TableRow {
                id: chunk_id(&source_uri, index, &payload),
                doc_id: None,
                source_uri,
                index,
                values: values.clone(),
                text,
            })
        })
        .collect()
}

fn groups_from_documents(documents: &[Document], images: Option<&ImagesConfig>) -> Vec<InputUnit> {
    let group_size = images.map_or(4, |i| i.group_size).max(1);
    let mut units = Vec::new();
    let mut current_uris = Vec::new();
    let mut current_blobs = Vec::new();

    let mut flush = |uris: &mut Vec<String>, blobs: &mut Vec<fmf_core::Blob>, units: &mut Vec<InputUnit>| {
        if blobs.is_empty() {
            return;
        }
        let seed = uris.join("|");
        units.push(InputUnit::Group(ImageGroup {
            id: chunk_id(&seed, units.len(), &seed),
            source_uris: std::mem::take(uris),
            blobs: std::mem::take(blobs),
        }));
    };

    for doc in documents {
        for blob in &doc.blobs {
            if !current_uris.contains(&doc.source_uri) {
                current_uris.push(doc.source_uri.clone());
            }
            current_blobs.push(blob.clone());
            if current_blobs.len() >= group_size {
                flush(&mut current_uris, &mut current_blobs, &mut units);
            }
        }
    }
    flush(&mut current_uris, &mut current_blobs, &mut units);
    units
}

/// Index a unit's source documents by id, for looking up the `document`
/// context value during interpolation.
#[must_use]
pub fn document_lookup(documents: &[Document]) -> BTreeMap<String, Document> {
    documents.iter().map(|d| (d.id.clone(), d.clone())).collect()
}

/// Collect the chain's iteration domain: load every matching document from
/// the configured connector (or use inline rows for `dataframe_rows`), then
/// derive chunks, rows, or image groups per `inputs.mode`.
pub async fn collect_inputs(config: &InputsConfig, connector: Option<Arc<dyn Connector>>) -> Result<InputCollections, FmfError> {
    if matches!(config.mode, Some(InputMode::DataframeRows)) {
        return Ok(InputCollections { documents: Vec::new(), units: rows_from_inline(&config.rows) });
    }

    let connector = connector.ok_or_else(|| FmfError::config("inputs.connector is required unless mode is dataframe_rows"))?;
    let documents = load_documents(connector.as_ref(), &config.select).await?;

    let units = match config.mode {
        Some(InputMode::TableRows) => rows_from_table(&documents, config.table.as_ref())?,
        Some(InputMode::ImagesGroup) => groups_from_documents(&documents, config.images.as_ref()),
        Some(InputMode::DataframeRows) => unreachable!("handled above"),
        None => chunk_documents(&documents, config),
    };

    Ok(InputCollections { documents, units })
}

/// Render a [`Document`] for the `document.*` interpolation path, omitting
/// blob payload bytes (image data is injected separately for multimodal
/// steps, not interpolated as text).
fn document_value(doc: &Document) -> Value {
    json!({
        "id": doc.id,
        "source_uri": doc.source_uri,
        "text": doc.text,
        "mime": doc.mime,
        "metadata": doc.metadata,
    })
}

impl InputUnit {
    /// Stable identifier, used for artefact record ordering and logging.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Chunk(c) => &c.id,
            Self::Row(r) => &r.id,
            Self::Group(g) => &g.id,
        }
    }

    /// Source URI this unit derives from (joined for multi-source groups).
    #[must_use]
    pub fn source_uri(&self) -> String {
        match self {
            Self::Chunk(c) => c.source_uri.clone(),
            Self::Row(r) => r.source_uri.clone(),
            Self::Group(g) => g.source_uris.join(","),
        }
    }

    /// Text used as the default RAG query and as the default unit text
    /// when a step does not override `inputs.*`.
    #[must_use]
    pub fn default_text(&self) -> String {
        match self {
            Self::Chunk(c) => c.text.clone(),
            Self::Row(r) => r.text.clone().unwrap_or_default(),
            Self::Group(g) => g.source_uris.join(" "),
        }
    }

    /// Image blobs carried by this unit (non-empty only for groups).
    #[must_use]
    pub fn blobs(&self) -> &[fmf_core::Blob] {
        match self {
            Self::Group(g) => &g.blobs,
            Self::Chunk(_) | Self::Row(_) => &[],
        }
    }

    /// Build this unit's ambient interpolation context: `chunk`/`row`/`group`
    /// plus `all` (the snapshot of previously finished steps' outputs) and,
    /// when the unit traces back to a loaded document, `document`.
    #[must_use]
    pub fn context(&self, all: &BTreeMap<String, Vec<Value>>, documents: &BTreeMap<String, Document>) -> Value {
        let all_value = json!(all);
        match self {
            Self::Chunk(c) => {
                let mut ctx = json!({
                    "chunk": {
                        "id": c.id,
                        "text": c.text,
                        "source_uri": c.source_uri,
                        "doc_id": c.doc_id,
                    },
                    "all": all_value,
                });
                if let Some(doc) = documents.get(&c.doc_id) {
                    ctx["document"] = document_value(doc);
                }
                ctx
            }
            Self::Row(r) => {
                let mut row = json!({
                    "id": r.id,
                    "source_uri": r.source_uri,
                    "index": r.index,
                    "text": r.text,
                });
                if let Value::Object(map) = &mut row {
                    for (k, v) in &r.values {
                        map.insert(k.clone(), v.clone());
                    }
                }
                let mut ctx = json!({"row": row, "all": all_value});
                if let Some(doc) = r.doc_id.as_ref().and_then(|id| documents.get(id)) {
                    ctx["document"] = document_value(doc);
                }
                ctx
            }
            Self::Group(g) => json!({
                "group": {
                    "id": g.id,
                    "size": g.blobs.len(),
                    "source_uris": g.source_uris,
                },
                "all": all_value,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmf_core::Blob;

    #[test]
    fn dataframe_rows_synthesize_pseudo_uris_and_stable_ids() {
        let mut row = BTreeMap::new();
        row.insert("name".to_string(), json!("alice"));
        let units = rows_from_inline(&[row]);
        let InputUnit::Row(r) = &units[0] else { panic!("expected row") };
        assert_eq!(r.source_uri, "inline://row/0");
        assert_eq!(r.index, 0);
        assert!(!r.id.is_empty());
    }

    #[test]
    fn groups_from_documents_respects_group_size_and_keeps_remainder() {
        let blob = |n: u8| Blob { id: format!("b{n}"), media_type: "image/png".to_string(), data: vec![n] };
        let docs = vec![
            Document {
                id: "d1".into(),
                source_uri: "file:///a.png".into(),
                text: None,
                mime: Some("image/png".into()),
                metadata: BTreeMap::new(),
                blobs: vec![blob(1), blob(2), blob(3)],
            },
            Document {
                id: "d2".into(),
                source_uri: "file:///b.png".into(),
                text: None,
                mime: Some("image/png".into()),
                metadata: BTreeMap::new(),
                blobs: vec![blob(4)],
            },
        ];
        let config = ImagesConfig { group_size: 2 };
        let units = groups_from_documents(&docs, Some(&config));
        assert_eq!(units.len(), 2);
        let InputUnit::Group(first) = &units[0] else { panic!("expected group") };
        assert_eq!(first.blobs.len(), 2);
        let InputUnit::Group(second) = &units[1] else { panic!("expected group") };
        assert_eq!(second.blobs.len(), 2);
    }

    #[test]
    fn chunk_context_exposes_dotted_fields_for_interpolation() {
        let chunk = Chunk {
            id: "c1".into(),
            doc_id: "d1".into(),
            source_uri: "file:///a.txt".into(),
            text: "hello".into(),
            provenance: fmf_core::ChunkProvenance { index: 0, splitter: "by_sentence", length_chars: 5 },
        };
        let unit = InputUnit::Chunk(chunk);
        let ctx = unit.context(&BTreeMap::new(), &BTreeMap::new());
        assert_eq!(ctx["chunk"]["text"], json!("hello"));
        assert_eq!(ctx["chunk"]["source_uri"], json!("file:///a.txt"));
    }

    #[test]
    fn chunk_context_includes_parent_document_when_known() {
        let chunk = Chunk {
            id: "c1".into(),
            doc_id: "d1".into(),
            source_uri: "file:///a.txt".into(),
            text: "hello".into(),
            provenance: fmf_core::ChunkProvenance { index: 0, splitter: "by_sentence", length_chars: 5 },
        };
        let doc = Document {
            id: "d1".into(),
            source_uri: "file:///a.txt".into(),
            text: Some("hello world".into()),
            mime: Some("text/plain".into()),
            metadata: BTreeMap::new(),
            blobs: Vec::new(),
        };
        let documents = document_lookup(&[doc]);
        let unit = InputUnit::Chunk(chunk);
        let ctx = unit.context(&BTreeMap::new(), &documents);
        assert_eq!(ctx["document"]["id"], json!("d1"));
        assert_eq!(ctx["document"]["text"], json!("hello world"));
    }

    #[test]
    fn row_context_includes_parent_document_when_table_rows() {
        let doc = Document {
            id: "d1".into(),
            source_uri: "file:///t.csv".into(),
            text: Some("a,b\n1,2\n".into()),
            mime: Some("text/csv".into()),
            metadata: BTreeMap::new(),
            blobs: Vec::new(),
        };
        let documents = document_lookup(std::slice::from_ref(&doc));
        let rows = rows_from_table(&[doc], None).unwrap();
        let InputUnit::Row(row) = &rows[0] else { panic!("expected row") };
        let ctx = InputUnit::Row(row.clone()).context(&BTreeMap::new(), &documents);
        assert_eq!(ctx["document"]["id"], json!("d1"));
    }

    #[test]
    fn dataframe_row_context_has_no_document() {
        let mut row = BTreeMap::new();
        row.insert("name".to_string(), json!("alice"));
        let units = rows_from_inline(&[row]);
        let ctx = units[0].context(&BTreeMap::new(), &BTreeMap::new());
        assert!(ctx.get("document").is_none());
    }
}
