//! # Concept Coder
//!
//! Concept-grounded coding and relevant-context retrieval over batches of
//! documents.
//!
//! Given a concept (a short label plus a free-text description) and a set of
//! input files, Concept Coder either asks a language model to code each whole
//! document against the concept, or retrieves the passages most relevant to
//! the concept and exports them for human review.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Extract  │──▶│  Routing  │──▶│ Chunk + Index │──▶│ Completion  │
//! │ text, PDF │   │  tokens   │   │  top-k ≥ thr  │   │ or evidence │
//! └───────────┘   └─────┬─────┘   └──────────────┘   └──────┬──────┘
//!                       │ small document                    │
//!                       └──────────▶ Completion ────────────┤
//!                                                           ▼
//!                                                    ┌─────────────┐
//!                                                    │   Writers   │
//!                                                    │ text / CSV  │
//!                                                    └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! coder concepts add Trust "Reliance on the integrity of others"
//! coder inspect ./interviews                    # routes and chunk counts, offline
//! coder run --concept Trust ./interviews        # fully-automated coding
//! coder run --concept Trust --mode retrieval --format tabular ./interviews
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | Plain text and PDF extraction |
//! | [`chunk`] | Recursive separator chunking |
//! | [`concepts`] | Concept codebook |
//! | [`embedding`] | Embedding providers and vector helpers |
//! | [`completion`] | Completion (chat) providers |
//! | [`index`] | Per-file similarity index |
//! | [`routing`] | Token-budget routing |
//! | [`prompt`] | Prompt assembly |
//! | [`pipeline`] | Per-file orchestration |
//! | [`writer`] | Result files and run summary |
//! | [`progress`] | Progress reporting on stderr |

pub mod chunk;
pub mod completion;
pub mod concepts;
pub mod concepts_cmd;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
mod http;
pub mod index;
pub mod inputs;
pub mod inspect;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod routing;
pub mod run_cmd;
pub mod writer;
