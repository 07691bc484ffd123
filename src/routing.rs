// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Routing-key helpers shared by the receiver and the in-memory backend.

/// Splits a comma-separated routing-key list into independent patterns.
pub fn split_routing_keys(routing_key: &str) -> Vec<String> {
    routing_key
        .split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Topic-exchange matching: `*` matches exactly one segment, `#` matches zero
/// or more segments.
///
/// Runs in `O(pattern segments * key segments)`.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let mut segments: Vec<&str> = vec![];
    for segment in pattern.split('.') {
        // consecutive `#` match exactly what a single one does
        if segment == "#" && segments.last() == Some(&"#") {
            continue;
        }
        segments.push(segment);
    }

    let key: Vec<&str> = if routing_key.is_empty() {
        vec![]
    } else {
        routing_key.split('.').collect()
    };

    // matched[j]: the pattern prefix seen so far matches the first j key segments
    let mut matched = vec![false; key.len() + 1];
    matched[0] = true;

    for segment in segments {
        let mut next = vec![false; key.len() + 1];
        for j in 0..=key.len() {
            next[j] = match segment {
                "#" => matched[j] || (j > 0 && next[j - 1]),
                "*" => j > 0 && matched[j - 1],
                word => j > 0 && matched[j - 1] && key[j - 1] == word,
            };
        }
        matched = next;
    }

    matched[key.len()]
}
