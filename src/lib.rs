//! # chatscope
//!
//! A local-first pipeline for ingesting two-party chat exports and running
//! tiered relationship analysis over them.
//!
//! chatscope normalizes heterogeneous exports (WhatsApp, iMessage, generic
//! logs, JSON exports, screenshots, zip archives) into a single deduplicated
//! timeline, then drives it through analysis stages — a fast baseline triage
//! or a deep multi-specialist pass with verification — and assembles the
//! findings into a hierarchical report.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌───────────────┐
//! │   Exports    │──▶│ Extract+Parse │──▶│   Timeline    │
//! │ txt/json/zip │   │  + Stitch     │   │   (SQLite)    │
//! └──────────────┘   └───────────────┘   └──────┬────────┘
//!                                               │
//!                  ┌────────────────────────────┤
//!                  ▼                            ▼
//!           ┌─────────────┐              ┌─────────────┐
//!           │  Baseline   │              │    Deep     │
//!           │   triage    │              │ specialists │
//!           └──────┬──────┘              └──────┬──────┘
//!                  └────────────┬───────────────┘
//!                               ▼
//!                        ┌────────────┐
//!                        │   Report   │
//!                        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chs init                                  # create database
//! chs ingest family-chat ./export.zip       # baseline analysis, inline
//! chs ingest family-chat ./export.zip --kind deep --enqueue
//! chs worker                                # drain the job queue
//! chs report <case-id>                      # print the stored report
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Staged-file extraction (text, JSON, zip, images) |
//! | [`parse`] | Chat export format recognizers |
//! | [`timeline`] | Timeline stitching |
//! | [`store`] | Typed artifact store with TTLs |
//! | [`cases`] | Case records and lifecycle |
//! | [`queue`] | Durable job queue |
//! | [`reasoning`] | Reasoning provider abstraction |
//! | [`stages`] | Analysis stages |
//! | [`pipeline`] | Pipeline orchestration |
//! | [`report`] | Report assembly |
//! | [`worker`] | Worker pool |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cases;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod reasoning;
pub mod report;
pub mod stages;
pub mod store;
pub mod timeline;
pub mod worker;
