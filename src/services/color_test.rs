use super::*;

#[test]
fn hash_matches_reference_values() {
    assert_eq!(identity_hash(""), 0);
    assert_eq!(identity_hash("a"), 97);
    assert_eq!(identity_hash("bob"), 97_717);
    assert_eq!(identity_hash("user_1"), -836_030_275);
}

#[test]
fn hash_walks_utf16_units() {
    // Surrogate pair: two code units, not one scalar value.
    assert_eq!(identity_hash("😀"), 1_772_899);
}

#[test]
fn palette_index_uses_absolute_value() {
    assert_eq!(palette_index("user_1"), 1);
    assert_eq!(palette_index("user_2NNEqL3"), 5);
    assert_eq!(palette_index("alice"), 0);
}

#[test]
fn color_is_stable_across_calls() {
    let first = color_for("user_2NNEqL3");
    for _ in 0..10 {
        assert_eq!(color_for("user_2NNEqL3"), first);
    }
    assert_eq!(first, PALETTE[5]);
}

#[test]
fn empty_identity_gets_first_color() {
    assert_eq!(color_for(""), PALETTE[0]);
}

#[test]
fn every_color_is_in_palette() {
    for i in 0..200 {
        let color = color_for(&format!("user_{i}"));
        assert!(PALETTE.contains(&color));
    }
}
