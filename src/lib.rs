//! # Shelfdex
//!
//! A personal document library: scanned books, comics, PDFs, EPUBs, and
//! Markdown notes, searchable with mixed CJK/Latin full-text search.
//!
//! Text extracted from each document is normalized and stored in a SQLite
//! FTS5 index. Latin text is indexed as words; dense scripts (CJK) are
//! indexed as overlapping bigrams, so substring queries work without a word
//! segmenter. Queries are rewritten to try both forms at once.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │ Extractors │──▶│ Tokenize │──▶│  Index   │──▶│  SQLite  │
//! │ PDF/ZIP/   │   │ n-gram + │   │  writer  │   │  FTS5    │
//! │ EPUB/MD    │   │ OCR fix  │   └──────────┘   └────┬─────┘
//! └────────────┘   └──────────┘                       │
//!                                                     ▼
//!                  ┌──────────┐   ┌──────────┐   ┌──────────┐
//!   user query ───▶│  Query   │──▶│  Search  │──▶│ Excerpts │
//!                  │ rewriter │   │  (BM25)  │   │          │
//!                  └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`tokenize`] | Dense-script detection, n-grams, OCR cleanup |
//! | [`extract`] | Per-format page text, thumbnails, page images |
//! | [`store`] | Storage trait and SQLite/FTS5 implementation |
//! | [`files`] | Document and thumbnail files on disk |
//! | [`index`] | Atomic re-indexing |
//! | [`ingest`] | Registration, import, notes, removal |
//! | [`query`] | Query rewriting |
//! | [`excerpt`] | Hit excerpts |
//! | [`search`] | Search pipeline |
//! | [`library`] | Library handle and catalogue operations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod error;
pub mod excerpt;
pub mod extract;
pub mod files;
pub mod index;
pub mod ingest;
pub mod library;
pub mod migrate;
pub mod models;
pub mod query;
pub mod search;
pub mod store;
pub mod tokenize;
