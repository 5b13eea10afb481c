use approx::assert_abs_diff_eq;

use tracetree::span_tree::SpanTree;
use tracetree::viewport::{max_depth_in_range, select_window, Rect, ViewportMode};

use test_helpers::*;

/// Tree with max depth 3: a (depth 1) -> b (depth 2) -> c (depth 3).
fn three_level_tree() -> SpanTree {
    SpanTree::build(&[
        span("a", 0.0, 10.0),
        child("b", "a", 0.0, 5.0),
        child("c", "b", 1.0, 2.0),
    ])
}

fn view(rows: f64) -> Rect {
    Rect::new(0.0, 0.0, 10.0, rows)
}

#[test]
fn test_fits_anchors_top() {
    let tree = three_level_tree();
    assert_eq!(tree.max_depth(), 3);

    // Deepest overlapping span is `a` (depth 1).
    let selection = select_window(&tree, view(3.0), 6.0, 8.0);
    assert_eq!(selection.mode, ViewportMode::AnchorTop);
    assert_abs_diff_eq!(selection.window.y, 0.0);
    assert_abs_diff_eq!(selection.window.height, 3.0);

    // Deepest overlapping span is `b` (depth 2).
    let selection = select_window(&tree, view(3.0), 3.0, 4.0);
    assert_eq!(max_depth_in_range(&tree, 3.0, 4.0), 2);
    assert_eq!(selection.mode, ViewportMode::AnchorTop);
    assert_abs_diff_eq!(selection.window.y, 0.0);
}

#[test]
fn test_too_deep_anchors_bottom() {
    let tree = three_level_tree();

    let selection = select_window(&tree, view(2.0), 3.0, 4.0);
    assert_eq!(selection.mode, ViewportMode::AnchorBottom);
    assert_abs_diff_eq!(selection.window.y, 1.0);
    assert_abs_diff_eq!(selection.window.height, 2.0);
}

#[test]
fn test_horizontal_range_is_kept() {
    let tree = three_level_tree();

    let selection = select_window(&tree, view(2.0), 3.0, 4.5);
    assert_abs_diff_eq!(selection.window.x, 3.0);
    assert_abs_diff_eq!(selection.window.width, 1.5);
}

/// When the enclosing span and everything below it leave spare rows, the spare rows go to the
/// spans above it and the window is anchored to the top.
#[test]
fn test_spare_rows_show_context_above() {
    let tree = SpanTree::build(&nested_scenario());
    assert_eq!(tree.max_depth(), 4);

    // Range covers only `f` (depth 4) inside `e` (depth 3).
    let selection = select_window(&tree, Rect::new(0.0, 0.0, 10.0, 4.0), 6.0, 7.0);
    assert_eq!(selection.mode, ViewportMode::AnchorTop);
    assert_abs_diff_eq!(selection.window.y, 1.0);
    assert_abs_diff_eq!(selection.window.height, 4.0);
}

#[test]
fn test_no_spare_rows_anchors_bottom() {
    let tree = SpanTree::build(&nested_scenario());

    let selection = select_window(&tree, Rect::new(0.0, 0.0, 10.0, 2.0), 6.0, 7.0);
    assert_eq!(selection.mode, ViewportMode::AnchorBottom);
    assert_abs_diff_eq!(selection.window.y, 3.0);
    assert_abs_diff_eq!(selection.window.height, 2.0);
}

#[test]
fn test_window_never_exceeds_tree_depth() {
    let tree = SpanTree::build(&nested_scenario());
    let tree_rows = (tree.max_depth() + 1) as f64;

    for rows in 0..8 {
        for (start, end) in [(0.0, 10.0), (2.0, 3.0), (4.2, 4.8), (6.0, 7.0), (9.5, 12.0)] {
            let selection = select_window(&tree, Rect::new(0.0, 0.0, 10.0, rows as f64), start, end);
            assert!(selection.window.y >= 0.0);
            assert!(
                selection.window.y + selection.window.height <= tree_rows,
                "window {:?} too deep for rows={rows} range=[{start}, {end}]",
                selection.window
            );
            if max_depth_in_range(&tree, start, end) < rows {
                assert_eq!(selection.mode, ViewportMode::AnchorTop);
                assert_abs_diff_eq!(selection.window.y, 0.0);
            }
        }
    }
}

#[test]
fn test_empty_tree() {
    let tree = SpanTree::build(&[]);

    let selection = select_window(&tree, Rect::new(0.0, 0.0, 10.0, 5.0), 1.0, 2.0);
    assert_eq!(selection.mode, ViewportMode::AnchorTop);
    assert_abs_diff_eq!(selection.window.y, 0.0);
    assert_abs_diff_eq!(selection.window.height, 1.0);
}
