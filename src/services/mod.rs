// ABOUTME: Domain services bridging storage, retrieval, and generation
// ABOUTME: Guide orchestration and session-to-account merge live here
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

pub mod guide_orchestration;
pub mod merge;

pub use guide_orchestration::GuideOrchestrator;
pub use merge::{merge_session_into_account, MergeOutcome};
