/*
 * 5D Labs Releaser - Kubernetes Release Orchestrator for Git Repositories
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Release orchestration core library
//!
//! This crate provides the `Releaser` custom resource, the release pass that
//! tags and releases its repositories, the GitOps write-back that advances
//! the request lifecycle and the controllers that drive them.

pub mod crds;
pub mod tasks;

// Re-export commonly used types
pub use crds::{Phase, Releaser, ReleaserSpec, ReleaserStatus, Repository};
pub use tasks::config::ControllerConfig;
pub use tasks::release::{PassOutcome, ReleasePipeline};
