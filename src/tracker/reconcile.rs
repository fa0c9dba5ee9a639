// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-identity differential comparison between the known ledger and the
//! latest scan.

use crate::models::flow::Flow;

/// Outcome of diffing one identity's known flows against its current scan.
#[derive(Debug, Default)]
pub(crate) struct ListDiff {
    /// Still running; these keep their existing connection ids.
    pub kept: Vec<Flow>,
    /// No longer reported by the kernel; end times not yet stamped.
    pub closed: Vec<Flow>,
    /// Present in the scan only; connection ids not yet assigned.
    pub opened: Vec<Flow>,
}

/// Consumes both lists and classifies every flow.
///
/// Each known flow is matched against the scan by structural equality; a
/// hit removes the scan entry (the ledger copy wins, id included). Insertion
/// order is preserved in all three outputs so the outbound queue stays
/// deterministic. Duplicate ledger entries collapse here: the second copy
/// finds no scan entry left to match and is reported closed.
pub(crate) fn diff_flow_lists(known: Vec<Flow>, mut current: Vec<Flow>) -> ListDiff {
    let mut diff = ListDiff {
        kept: Vec::with_capacity(known.len()),
        ..ListDiff::default()
    };

    for flow in known {
        match current.iter().position(|seen| seen.same_endpoints(&flow)) {
            Some(at) => {
                current.remove(at);
                diff.kept.push(flow);
            },
            None => diff.closed.push(flow),
        }
    }

    diff.opened = current;
    diff
}
