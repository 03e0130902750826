// SPDX-License-Identifier: MIT OR Apache-2.0
//! Splitting batch inputs into per-step processing units: text chunks,
//! table rows, and image groups.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod chunking;
pub mod image_groups;
pub mod table_rows;

pub use chunking::{chunk_text, estimate_tokens, Splitter};
pub use image_groups::{group_all, group_images, GroupBy};
pub use table_rows::{clean_headers, iter_csv_rows, iter_table_rows, TextColumn};
