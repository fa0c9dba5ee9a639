// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Linewise parser for `conntrack -L` output.

use std::net::Ipv4Addr;

use tracing::warn;

use crate::models::flow::Flow;

/// Parses a combined conntrack dump into flow records.
///
/// The first line is a header and is discarded. Lines without a non-zero
/// `mark=` token describe flows the gateway does not own and are skipped
/// silently; a marked line with a malformed tuple is logged and skipped.
pub(crate) fn parse_flow_dump(dump: &str, now: i64) -> Vec<Flow> {
    dump.lines()
        .skip(1)
        .filter_map(|line| parse_flow_line(line, now))
        .collect()
}

fn parse_flow_line(line: &str, now: i64) -> Option<Flow> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    let (_, mark) = token_value(&tokens, 0, "mark=")?;
    let sdp_id = match mark.parse::<u32>() {
        Ok(id) => id,
        Err(_) => {
            warn!(line, "failed to extract mark value from conntrack line");
            return None;
        },
    };
    if sdp_id == 0 {
        return None;
    }

    // The four tuple fields must appear in relative order; conntrack prints
    // the reply direction with the same keys further right, so each search
    // resumes after the previous hit.
    let Some((src_at, src)) = token_value(&tokens, 0, "src=") else {
        warn!(line, "failed to find start of connection details");
        return None;
    };
    let dst = token_value(&tokens, src_at + 1, "dst=");
    let sport = dst.and_then(|(at, _)| token_value(&tokens, at + 1, "sport="));
    let dport = sport.and_then(|(at, _)| token_value(&tokens, at + 1, "dport="));
    let (Some((_, dst)), Some((_, sport)), Some((_, dport))) = (dst, sport, dport) else {
        warn!(line, "failed to find connection details in line");
        return None;
    };

    let parsed = (
        src.parse::<Ipv4Addr>(),
        dst.parse::<Ipv4Addr>(),
        sport.parse::<u16>(),
        dport.parse::<u16>(),
    );
    let (Ok(src_ip), Ok(dst_ip), Ok(src_port), Ok(dst_port)) = parsed else {
        warn!(line, "failed to parse connection details in line");
        return None;
    };

    Some(Flow::observed(
        sdp_id,
        src_ip.to_string(),
        src_port,
        dst_ip.to_string(),
        dst_port,
        now,
    ))
}

/// First token at or after `from` carrying the given `key=` prefix.
fn token_value<'a>(tokens: &[&'a str], from: usize, key: &str) -> Option<(usize, &'a str)> {
    tokens
        .iter()
        .enumerate()
        .skip(from)
        .find_map(|(at, token)| token.strip_prefix(key).map(|value| (at, value)))
}
