//! Transfer size accounting.

use serde_json::Value as Json;

/// Byte length of the compact JSON serialization, computed without
/// serializing.
pub fn json_size(value: &Json) -> usize {
    match value {
        Json::Null => 4,
        Json::Bool(true) => 4,
        Json::Bool(false) => 5,
        Json::Number(n) => n.to_string().len(),
        Json::String(s) => string_size(s),
        Json::Array(arr) => {
            let items: usize = arr.iter().map(json_size).sum();
            2 + items + arr.len().saturating_sub(1)
        }
        Json::Object(obj) => {
            let entries: usize = obj.iter().map(|(k, v)| string_size(k) + 1 + json_size(v)).sum();
            2 + entries + obj.len().saturating_sub(1)
        }
    }
}

fn string_size(s: &str) -> usize {
    let escaped: usize = s
        .chars()
        .map(|ch| match ch {
            '"' | '\\' | '\u{08}' | '\u{0c}' | '\n' | '\r' | '\t' => 2,
            c if (c as u32) < 0x20 => 6,
            c => c.len_utf8(),
        })
        .sum();
    2 + escaped
}

/// Plain JSON size against packet size for one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeReport {
    pub baseline_bytes: usize,
    pub packet_bytes: usize,
}

impl SizeReport {
    pub fn saved_bytes(&self) -> i64 {
        self.baseline_bytes as i64 - self.packet_bytes as i64
    }

    /// Percentage of the baseline saved; negative when the packet is larger.
    pub fn reduction_percent(&self) -> f64 {
        if self.baseline_bytes == 0 {
            return 0.0;
        }
        self.saved_bytes() as f64 * 100.0 / self.baseline_bytes as f64
    }
}
