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

//! MIME-type lookup from a file path's extension. A pure function over a
//! fixed table; no content sniffing.

/// Returns the MIME type associated with `path`'s extension, falling back to
/// `application/octet-stream` for anything unrecognized or extension-less.
pub fn lookup(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_common_extensions() {
        assert_eq!("text/html", lookup("/index.html"));
        assert_eq!("text/css", lookup("/style.css"));
        assert_eq!("application/javascript", lookup("/app.js"));
        assert_eq!("image/png", lookup("/logo.png"));
        assert_eq!("image/jpeg", lookup("/photo.jpeg"));
    }

    #[test]
    fn is_case_insensitive() {
        assert_eq!("text/html", lookup("/INDEX.HTML"));
    }

    #[test]
    fn falls_back_for_unknown_or_missing_extension() {
        assert_eq!("application/octet-stream", lookup("/README"));
        assert_eq!("application/octet-stream", lookup("/archive.tar.gz"));
    }
}
