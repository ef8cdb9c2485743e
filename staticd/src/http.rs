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

//! Writes HTTP/1.1 responses as a pure function over a byte sink. Every
//! response this server sends closes the connection — there is no
//! keep-alive, pipelining, or chunked transfer.

use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

const WEEKDAYS: [&str; 7] = ["Thu", "Fri", "Sat", "Sun", "Mon", "Tue", "Wed"];
const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// A civil (Gregorian) date and time-of-day, always UTC in this server since
/// no local-timezone database is linked in.
struct Civil {
    year: i64,
    month: u32,
    day: u32,
    weekday: usize,
    hour: u32,
    minute: u32,
    second: u32,
}

/// Converts a Unix timestamp to a civil date using Howard Hinnant's
/// `civil_from_days` algorithm (proleptic Gregorian, valid for any date the
/// `i64` range can represent).
fn civil_from_unix(secs: i64) -> Civil {
    let days = secs.div_euclid(86_400);
    let time_of_day = secs.rem_euclid(86_400);

    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = if month <= 2 { y + 1 } else { y };

    let weekday = (days.rem_euclid(7)) as usize;

    Civil {
        year,
        month,
        day,
        weekday,
        hour: (time_of_day / 3600) as u32,
        minute: ((time_of_day % 3600) / 60) as u32,
        second: (time_of_day % 60) as u32,
    }
}

fn now_civil() -> Civil {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    civil_from_unix(secs)
}

/// Formats `now` as an RFC 1123 GMT date, e.g. `Mon, 27 Jul 2009 12:28:53 GMT`,
/// for the response `Date` header.
pub fn rfc1123_date() -> String {
    let c = now_civil();
    format!(
        "{}, {:02} {} {} {:02}:{:02}:{:02} GMT",
        WEEKDAYS[c.weekday], c.day, MONTHS[(c.month - 1) as usize], c.year, c.hour, c.minute, c.second
    )
}

/// Formats `now` as a Common Log Format timestamp, e.g.
/// `27/Jul/2026:10:00:00 +0000`, for the access log.
pub fn clf_timestamp() -> String {
    let c = now_civil();
    format!(
        "{:02}/{}/{}:{:02}:{:02}:{:02} +0000",
        c.day, MONTHS[(c.month - 1) as usize], c.year, c.hour, c.minute, c.second
    )
}

/// Returns the standard reason phrase for one of the status codes this
/// server emits.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Writes a complete HTTP/1.1 response: status line, headers, blank line,
/// and (if `body` is `Some`) the body. `content_length` is always sent as
/// the `Content-Length` header even when `body` is `None` (the HEAD case),
/// since the header must reflect what a `GET` of the same resource would
/// have sent.
pub fn write_response(
    w: &mut impl Write,
    status: u16,
    content_type: &str,
    content_length: usize,
    body: Option<&[u8]>,
) -> io::Result<()> {
    let header = format!(
        "HTTP/1.1 {} {}\r\n\
         Date: {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Server: ConcurrentHTTP/1.0\r\n\
         Connection: close\r\n\
         \r\n",
        status,
        reason_phrase(status),
        rfc1123_date(),
        content_type,
        content_length,
    );
    w.write_all(header.as_bytes())?;
    if let Some(body) = body {
        w.write_all(body)?;
    }
    Ok(())
}

/// Writes one of the server's fixed HTML error bodies and returns its byte
/// length (the caller needs this for logging/counters).
pub fn write_error(w: &mut impl Write, status: u16) -> io::Result<usize> {
    let body = error_body(status);
    write_response(w, status, "text/html", body.len(), Some(body.as_bytes()))?;
    Ok(body.len())
}

fn error_body(status: u16) -> String {
    format!("<h1>{} {}</h1>", status, reason_phrase(status))
}

/// Formats one Common Log Format access-log line.
pub fn common_log_format(client_ip: &str, method: &str, path: &str, status: u16, bytes: usize) -> String {
    format!(
        "{} - - [{}] \"{} {} HTTP/1.1\" {} {}\n",
        client_ip,
        clf_timestamp(),
        method,
        path,
        status,
        bytes
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc1123_date_has_expected_shape() {
        let date = rfc1123_date();
        // "Mon, 27 Jul 2009 12:28:53 GMT" — 29 characters.
        assert_eq!(29, date.len());
        assert!(date.ends_with(" GMT"));
        assert_eq!(b',', date.as_bytes()[3]);
    }

    #[test]
    fn civil_from_unix_matches_a_known_instant() {
        // 2009-02-13T23:31:30Z, a commonly cited Unix-epoch fixture.
        let c = civil_from_unix(1_234_567_890);
        assert_eq!(2009, c.year);
        assert_eq!(2, c.month);
        assert_eq!(13, c.day);
        assert_eq!(23, c.hour);
        assert_eq!(31, c.minute);
        assert_eq!(30, c.second);
    }

    #[test]
    fn write_response_for_get_includes_body() {
        let mut buf = Vec::new();
        write_response(&mut buf, 200, "text/plain", 2, Some(b"hi")).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("hi"));
    }

    #[test]
    fn write_response_for_head_omits_body_but_keeps_length() {
        let mut buf = Vec::new();
        write_response(&mut buf, 200, "text/plain", 2, None).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn write_error_emits_matching_html_body() {
        let mut buf = Vec::new();
        let len = write_error(&mut buf, 403).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(text.ends_with("<h1>403 Forbidden</h1>"));
        assert_eq!("<h1>403 Forbidden</h1>".len(), len);
    }

    #[test]
    fn common_log_format_matches_the_documented_shape() {
        let line = common_log_format("127.0.0.1", "GET", "/hello.txt", 200, 2);
        assert!(line.starts_with("127.0.0.1 - - ["));
        assert!(line.contains("] \"GET /hello.txt HTTP/1.1\" 200 2\n"));
    }
}
