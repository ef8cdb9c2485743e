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

#![deny(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! Parses the request line of an HTTP/1.1 request as a pure function over a
//! byte buffer. Headers, bodies, and anything past the first `\r\n` are not
//! this crate's concern — the server only ever needs method, target, and
//! version.

use core::fmt::Display;

pub mod raw_request;
pub mod request;

pub use request::RequestLine;

/// Method named on the request line. Only `Get` and `Head` are accepted
/// methods for this server; the remainder parse successfully so that the
/// server can answer `405 Method Not Allowed` rather than `400 Bad Request`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HttpMethod {
    /// RFC 9110 9.3.1
    Get,
    /// RFC 9110 9.3.2
    Head,
    /// RFC 9110 9.3.3
    Post,
    /// RFC 9110 9.3.4
    Put,
    /// RFC 9110 9.3.5
    Delete,
    /// RFC 9110 9.3.6
    Connect,
    /// RFC 9110 9.3.7
    Options,
    /// RFC 9110 9.3.8
    Trace,
}

impl Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
        })
    }
}

/// Version named on the request line.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum HttpVersion {
    /// HTTP/1.0
    H1_0,
    /// HTTP/1.1
    H1_1,
    /// HTTP/2 (accepted as a version token; this server speaks 1.x only)
    H2,
    /// HTTP/3 (accepted as a version token; this server speaks 1.x only)
    H3,
}

impl Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::H1_0 => "HTTP/1.0",
            Self::H1_1 => "HTTP/1.1",
            Self::H2 => "HTTP/2",
            Self::H3 => "HTTP/3",
        })
    }
}

/// Failures that can occur while parsing a request line.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Invalid byte in method, or no trailing space found.
    Method,
    /// Invalid byte in request target, or no trailing space found.
    Target,
    /// Invalid or unrecognized HTTP version.
    Version,
    /// The request line wasn't terminated by `\r\n`.
    NewLine,
}

impl ParseError {
    fn description_str(&self) -> &'static str {
        match *self {
            ParseError::Method => "invalid token in method",
            ParseError::Target => "invalid token in request target",
            ParseError::Version => "invalid or unrecognized HTTP version",
            ParseError::NewLine => "invalid or missing newline",
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description_str())
    }
}

impl std::error::Error for ParseError {}
