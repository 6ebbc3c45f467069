//! # Upload Chunker
//!
//! An HTTP service that accepts file uploads and splits each one into
//! fixed-size chunk files on disk, recording an MD5 checksum per chunk in an
//! in-memory index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  HTTP (axum) │──▶│ Ingest queue │──▶│ Ingest worker│
//! │ temp_<id>.bin│   │ bounded mpsc │   │ chunk + md5  │
//! └──────┬───────┘   └──────────────┘   └──────┬───────┘
//!        │                                     │
//!        │           ┌──────────────┐          │
//!        └──────────▶│ Chunk index  │◀─────────┘
//!          (dump)    │  in memory   │  <id>_<n>.bin
//!                    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! UPLOADS_DIR=/tmp/uploads CHUNK_SIZE=1048576 upload-chunker
//! curl -F file=@big.iso http://127.0.0.1:8000/upload-file
//! curl http://127.0.0.1:8000/uploaded_chunks_db
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`models`] | Index keys/entries and upload status |
//! | [`chunk`] | Fixed-size chunk reader |
//! | [`index`] | Chunk index trait and in-memory store |
//! | [`ingest`] | Per-upload chunk/checksum/store worker |
//! | [`queue`] | Bounded ingest queue and worker pool |
//! | [`status`] | Per-upload status registry |
//! | [`server`] | HTTP server |

pub mod chunk;
pub mod config;
pub mod index;
pub mod ingest;
pub mod models;
pub mod queue;
pub mod server;
pub mod status;
