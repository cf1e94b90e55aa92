// Copyright 2025 reqrepl Authors
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

//! # reqrepl CLI
//!
//! Command-line front end for reqrepl: it starts the HTTP listener, runs
//! the controller on the main thread and reads operator input in the
//! [`shell`] thread.
//!
//! ## Architecture
//!
//! The CLI uses the `argh` crate for argument parsing, `rustyline` for line
//! editing and the session machinery from `reqrepl-server`.

pub mod shell;
