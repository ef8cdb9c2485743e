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

//! HTTP/1.1 request line: `<method> <target> <version>\r\n`

use core::str::from_utf8_unchecked;

use crate::raw_request::RawRequest;
use crate::{HttpMethod, HttpVersion, ParseError};

/// Bytes allowed in a request target, per RFC 9110 Appendix B's `absolute-path`
/// and `query` productions, relaxed to any visible, non-control, non-space
/// ASCII byte — there is no need to distinguish path/query structure here,
/// only to find the boundary before the next space.
#[inline]
fn is_request_target_token(b: u8) -> bool {
    b > 0x20 && b != 0x7f
}

/// The parsed first line of an HTTP/1.1 request.
#[derive(Debug, PartialEq, Eq)]
pub struct RequestLine<'a> {
    /// The request method.
    pub method: HttpMethod,
    /// The request target, exactly as sent (not percent-decoded, not
    /// normalized).
    pub target: &'a str,
    /// The claimed HTTP version.
    pub version: HttpVersion,
}

impl<'a> RequestLine<'a> {
    /// Parses a request line out of `buf`. `buf` may contain more than the
    /// request line (headers, a partial body); only the leading
    /// `<method> <target> <version>\r\n` is consumed and reflected in the
    /// result — anything after it is ignored.
    ///
    /// # Example
    /// ```
    /// # use staticd_parser::{HttpMethod, HttpVersion, RequestLine};
    /// let req = RequestLine::parse(b"GET /index.html HTTP/1.1\r\n\r\n").unwrap();
    /// assert_eq!(HttpMethod::Get, req.method);
    /// assert_eq!("/index.html", req.target);
    /// assert_eq!(HttpVersion::H1_1, req.version);
    /// ```
    pub fn parse(buf: &'a [u8]) -> Result<Self, ParseError> {
        let mut cursor = RawRequest::new(buf);
        let method = parse_method(&mut cursor)?;
        let target = parse_target(&mut cursor)?;
        let version = parse_version(&mut cursor)?;
        take_after_newline(&mut cursor)?;

        Ok(RequestLine { method, target, version })
    }
}

fn parse_method<'a>(buf: &mut RawRequest<'a>) -> Result<HttpMethod, ParseError> {
    loop {
        match buf.next() {
            Some(b' ') => {
                let slice = buf.slice_skip(1).map_err(|_| ParseError::Method)?;
                return match slice {
                    b"GET" => Ok(HttpMethod::Get),
                    b"HEAD" => Ok(HttpMethod::Head),
                    b"POST" => Ok(HttpMethod::Post),
                    b"PUT" => Ok(HttpMethod::Put),
                    b"DELETE" => Ok(HttpMethod::Delete),
                    b"CONNECT" => Ok(HttpMethod::Connect),
                    b"OPTIONS" => Ok(HttpMethod::Options),
                    b"TRACE" => Ok(HttpMethod::Trace),
                    _ => Err(ParseError::Method),
                };
            }
            Some(&b) if b.is_ascii_uppercase() => continue,
            _ => return Err(ParseError::Method),
        }
    }
}

fn parse_target<'a>(buf: &mut RawRequest<'a>) -> Result<&'a str, ParseError> {
    loop {
        match buf.next() {
            Some(&b' ') => {
                let slice = buf.slice_skip(1).map_err(|_| ParseError::Target)?;
                // SAFETY: every byte accepted by is_request_target_token is
                // in 0x21..=0x7e, which is valid ASCII and therefore valid UTF-8.
                return Ok(unsafe { from_utf8_unchecked(slice) });
            }
            Some(&b) if is_request_target_token(b) => continue,
            _ => return Err(ParseError::Target),
        }
    }
}

fn parse_version<'a>(buf: &mut RawRequest<'a>) -> Result<HttpVersion, ParseError> {
    for expected in b"HTTP/" {
        if buf.next() != Some(expected) {
            buf.slice();
            return Err(ParseError::Version);
        }
    }

    let result = match buf.next() {
        Some(b'1') => match buf.next() {
            Some(b'.') => match buf.next() {
                Some(b'0') => Ok(HttpVersion::H1_0),
                Some(b'1') => Ok(HttpVersion::H1_1),
                _ => Err(ParseError::Version),
            },
            _ => Err(ParseError::Version),
        },
        Some(b'2') => Ok(HttpVersion::H2),
        Some(b'3') => Ok(HttpVersion::H3),
        _ => Err(ParseError::Version),
    };

    buf.slice();
    result
}

fn take_after_newline<'a>(buf: &mut RawRequest<'a>) -> Result<(), ParseError> {
    loop {
        match buf.next() {
            Some(&b'\r') => {
                if buf.peek() == Some(b'\n') {
                    buf.next();
                    buf.slice();
                    return Ok(());
                }
            }
            Some(_) => {}
            None => return Err(ParseError::NewLine),
        }
    }
}
