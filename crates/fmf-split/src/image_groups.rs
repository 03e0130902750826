// SPDX-License-Identifier: MIT OR Apache-2.0
//! Grouping of image blobs into multimodal processing units.

use fmf_core::{Blob, Document, ImageGroup};
use fmf_ids::chunk_id as group_id_seed;

/// Group strategy for images extracted from documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    /// Every document's images form their own group.
    PerDocument,
    /// Every image forms its own single-member group.
    PerImage,
}

/// Build image groups from a set of loaded documents.
#[must_use]
pub fn group_images(docs: &[Document], strategy: GroupBy) -> Vec<ImageGroup> {
    let mut groups = Vec::new();
    match strategy {
        GroupBy::PerDocument => {
            for doc in docs {
                if doc.blobs.is_empty() {
                    continue;
                }
                let seed = format!("{}|images", doc.id);
                groups.push(ImageGroup {
                    id: group_id_seed(&seed, groups.len(), &seed),
                    source_uris: vec![doc.source_uri.clone()],
                    blobs: doc.blobs.clone(),
                });
            }
        }
        GroupBy::PerImage => {
            for doc in docs {
                for blob in &doc.blobs {
                    let seed = format!("{}|{}", doc.id, blob.id);
                    groups.push(ImageGroup {
                        id: group_id_seed(&seed, groups.len(), &seed),
                        source_uris: vec![doc.source_uri.clone()],
                        blobs: vec![blob.clone()],
                    });
                }
            }
        }
    }
    groups
}

/// Produce a group containing every blob across `docs`, tagged with every
/// contributing source URI. Used when a RAG pipeline or chain step wants a
/// single multimodal bundle rather than per-document grouping.
#[must_use]
pub fn group_all(docs: &[Document]) -> Option<ImageGroup> {
    let mut blobs: Vec<Blob> = Vec::new();
    let mut source_uris = Vec::new();
    for doc in docs {
        if !doc.blobs.is_empty() {
            source_uris.push(doc.source_uri.clone());
            blobs.extend(doc.blobs.iter().cloned());
        }
    }
    if blobs.is_empty() {
        return None;
    }
    let seed = source_uris.join("|");
    Some(ImageGroup {
        id: group_id_seed(&seed, 0, &seed),
        source_uris,
        blobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc_with_blobs(id: &str, n: usize) -> Document {
        Document {
            id: id.to_string(),
            source_uri: format!("file:///{id}"),
            text: None,
            mime: None,
            metadata: BTreeMap::new(),
            blobs: (0..n)
                .map(|i| Blob {
                    id: format!("{id}_blob_{i}"),
                    media_type: "image/png".into(),
                    data: vec![i as u8],
                })
                .collect(),
        }
    }

    #[test]
    fn per_document_groups_skip_textless_docs_without_images() {
        let docs = vec![doc_with_blobs("doc_1", 2), doc_with_blobs("doc_2", 0)];
        let groups = group_images(&docs, GroupBy::PerDocument);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].blobs.len(), 2);
    }

    #[test]
    fn per_image_groups_one_blob_each() {
        let docs = vec![doc_with_blobs("doc_1", 3)];
        let groups = group_images(&docs, GroupBy::PerImage);
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.blobs.len() == 1));
    }

    #[test]
    fn group_all_merges_every_blob() {
        let docs = vec![doc_with_blobs("doc_1", 2), doc_with_blobs("doc_2", 1)];
        let group = group_all(&docs).unwrap();
        assert_eq!(group.blobs.len(), 3);
        assert_eq!(group.source_uris.len(), 2);
    }

    #[test]
    fn group_all_returns_none_without_images() {
        let docs = vec![doc_with_blobs("doc_1", 0)];
        assert!(group_all(&docs).is_none());
    }
}
