// Copyright 2022 Ryan Seipp
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

//! A concurrent static-content HTTP/1.1 server built around a single
//! accepting process and a pool of `fork()`'d worker processes, each
//! handling connections the acceptor hands it over a descriptor-passing
//! channel.

pub mod acceptor;
pub mod cache;
pub mod config;
pub mod http;
pub mod ipc;
pub mod logger;
pub mod mime;
pub mod queue;
pub mod shutdown;
pub mod stats;
pub mod worker;

pub use config::Config;
