// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Coarse hierarchical profiler (spec §1), rendered as a `tracing` span RAII
//! guard behind the `profiling` feature. This is the Rust shape of
//! `NodeVision.Profiling.h`'s scope-based markers: entering a scope pushes a
//! span, dropping the guard pops it, and nesting falls out of `tracing`'s
//! own span stack rather than a hand-rolled one.
//!
//! With the feature disabled, [`span`] is a no-op so the hot path pays
//! nothing for it.

/// RAII guard for one profiler scope. Dropping it ends the scope.
#[cfg(feature = "profiling")]
pub struct ProfileScope(tracing::span::EnteredSpan);

#[cfg(not(feature = "profiling"))]
pub struct ProfileScope;

/// Enter a named profiler scope. Nest by entering another scope before
/// dropping the outer guard.
#[cfg(feature = "profiling")]
pub fn span(name: &'static str) -> ProfileScope {
    ProfileScope(tracing::info_span!("ecs_scope", name).entered())
}

#[cfg(not(feature = "profiling"))]
pub fn span(_name: &'static str) -> ProfileScope {
    ProfileScope
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_guard_can_be_entered_and_dropped() {
        let _guard = span("store::create_entity");
    }
}
