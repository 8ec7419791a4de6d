//! Color assigner — deterministic collaborator colors.
//!
//! DESIGN
//! ======
//! A user's color is a pure function of their identity string: a 32-bit
//! rolling hash (`h * 31 + unit` over UTF-16 code units, wrapping) taken
//! modulo the palette size. Every viewer computes the same color for the
//! same user, across reconnects, with no stored assignment.

use serde::Serialize;

/// Fill and stroke pair used to draw a collaborator's cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollaboratorColor {
    pub fill: &'static str,
    pub stroke: &'static str,
}

pub const PALETTE: [CollaboratorColor; 6] = [
    CollaboratorColor { fill: "#6965db", stroke: "#6965db" },
    CollaboratorColor { fill: "#e03131", stroke: "#e03131" },
    CollaboratorColor { fill: "#2f9e44", stroke: "#2f9e44" },
    CollaboratorColor { fill: "#1971c2", stroke: "#1971c2" },
    CollaboratorColor { fill: "#c2255c", stroke: "#c2255c" },
    CollaboratorColor { fill: "#e67700", stroke: "#e67700" },
];

/// Color for a user identity.
#[must_use]
pub fn color_for(user_id: &str) -> CollaboratorColor {
    PALETTE[palette_index(user_id)]
}

fn palette_index(user_id: &str) -> usize {
    let hash = identity_hash(user_id);
    // u32 -> usize is lossless on every supported target.
    (hash.unsigned_abs() as usize) % PALETTE.len()
}

fn identity_hash(user_id: &str) -> i32 {
    user_id.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    })
}

#[cfg(test)]
#[path = "color_test.rs"]
mod tests;
