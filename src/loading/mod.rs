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

//! Asynchronous loading: the priority queue and the worker threads draining it.

pub mod queue;
pub mod worker;

pub use queue::{LoadCallback, LoadQueue, LoadRequest, LoadStatus, QueueCounts};
pub use worker::{default_thread_count, WorkerPool, WorkerStats};
