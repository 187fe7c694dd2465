//! SVG flamegraph generation for merged stack samples.
//!
//! Renders collapsed stacks without external tooling:
//! - Frame colors derived from the function name, so a function keeps its
//!   color across graphs
//! - Inverted layout (root at bottom), callees sorted by name
//! - Widths proportional to sample counts

use crate::profiler::CollapsedStack;
use crate::utils::error::FlamegraphError;
use log::info;

/// Color scheme for frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlamegraphPalette {
    /// Reds, oranges and yellows
    #[default]
    Hot,
    /// Blues and greens
    Cool,
}

/// Flamegraph configuration
#[derive(Debug, Clone)]
pub struct FlamegraphConfig {
    pub title: String,
    pub width: usize,
    pub palette: FlamegraphPalette,
}

impl Default for FlamegraphConfig {
    fn default() -> Self {
        Self {
            title: "Trace Profile".to_string(),
            width: 1200,
            palette: FlamegraphPalette::Hot,
        }
    }
}

impl FlamegraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_palette(mut self, palette: FlamegraphPalette) -> Self {
        self.palette = palette;
        self
    }
}

/// One box in the graph, in sample units along the x axis
#[derive(Debug, Clone, PartialEq)]
struct Frame<'a> {
    name: &'a str,
    depth: usize,
    start: u64,
    end: u64,
}

impl Frame<'_> {
    fn samples(&self) -> u64 {
        self.end - self.start
    }
}

/// Merge collapsed stacks into frames
///
/// Stacks are walked in sorted order, so stacks sharing a prefix are adjacent
/// and the shared frames stay open across them. Returns the frames and the
/// total sample count; depth 0 is the synthetic `all` frame.
fn merge_frames(stacks: &[CollapsedStack]) -> (Vec<Frame<'_>>, u64) {
    let mut sorted: Vec<(Vec<&str>, u64)> = stacks
        .iter()
        .filter(|s| s.weight > 0)
        .map(|s| (s.stack.split(';').collect(), s.weight))
        .collect();
    sorted.sort();

    let mut open: Vec<Frame<'_>> = Vec::new();
    let mut closed = Vec::new();
    let mut offset = 0u64;

    for (path, weight) in &sorted {
        let shared = open
            .iter()
            .zip(path)
            .take_while(|(frame, name)| frame.name == **name)
            .count();
        closed.extend(open.drain(shared..).map(|frame| Frame { end: offset, ..frame }));
        for (depth, name) in path.iter().enumerate().skip(shared) {
            open.push(Frame {
                name: *name,
                depth: depth + 1,
                start: offset,
                end: offset,
            });
        }
        offset = offset.saturating_add(*weight);
    }
    closed.extend(open.into_iter().map(|frame| Frame { end: offset, ..frame }));
    closed.push(Frame {
        name: "all",
        depth: 0,
        start: 0,
        end: offset,
    });

    (closed, offset)
}

const ROW_HEIGHT: usize = 20;
const TITLE_HEIGHT: usize = 30;
const FOOTER_HEIGHT: usize = 50;
const CHAR_WIDTH: f64 = 7.0;

/// Generate SVG flamegraph from collapsed stacks
///
/// **Public** - used by the flamegraph command and by sinks that export
/// profiles
///
/// # Errors
/// * `FlamegraphError::EmptyStacks` - nothing was sampled
pub fn generate_flamegraph(
    stacks: &[CollapsedStack],
    config: Option<&FlamegraphConfig>,
) -> Result<String, FlamegraphError> {
    if stacks.is_empty() {
        return Err(FlamegraphError::EmptyStacks);
    }

    let config = config.cloned().unwrap_or_default();
    info!("Generating flamegraph with {} stacks", stacks.len());

    let (frames, total) = merge_frames(stacks);
    let rows = frames.iter().map(|f| f.depth).max().unwrap_or(0) + 1;
    let graph_bottom = TITLE_HEIGHT + rows * ROW_HEIGHT;
    let height = graph_bottom + FOOTER_HEIGHT;
    let scale = config.width as f64 / total.max(1) as f64;

    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = config.width,
        h = height
    );
    svg.push_str(
        r#"<style>.frame { font: 12px sans-serif; } .frame:hover { stroke: black; cursor: pointer; }</style>"#,
    );
    svg.push_str(&format!(
        r#"<text x="{}" y="20" font-size="16" text-anchor="middle" font-weight="bold">{}</text>"#,
        config.width / 2,
        escape_xml(&config.title)
    ));

    // Root row sits at the bottom, callees stack upward
    for frame in &frames {
        let x = frame.start as f64 * scale;
        let w = frame.samples() as f64 * scale;
        if w < 0.5 {
            continue;
        }
        let y = graph_bottom - (frame.depth + 1) * ROW_HEIGHT;
        svg.push_str(&frame_svg(frame, x, y, w, total, config.palette));
    }

    svg.push_str(&format!(
        r#"<text x="10" y="{}" font-size="12">{} samples</text></svg>"#,
        graph_bottom + 30,
        total
    ));

    info!("Flamegraph generated successfully ({} bytes)", svg.len());
    Ok(svg)
}

fn frame_svg(frame: &Frame<'_>, x: f64, y: usize, w: f64, total: u64, palette: FlamegraphPalette) -> String {
    let share = frame.samples() as f64 * 100.0 / total.max(1) as f64;
    let mut out = format!(
        r#"<g class="frame"><title>{} ({} samples, {:.2}%)</title><rect x="{:.2}" y="{}" width="{:.2}" height="{}" fill="{}"/>"#,
        escape_xml(frame.name),
        frame.samples(),
        share,
        x,
        y,
        w,
        ROW_HEIGHT,
        get_node_color(frame.name, palette)
    );
    let label = truncate_chars(frame.name, (w / CHAR_WIDTH) as usize);
    if w > 35.0 && !label.is_empty() {
        out.push_str(&format!(
            r#"<text x="{:.2}" y="{}" dx="4" dy="14" font-size="12" pointer-events="none">{}</text>"#,
            x,
            y,
            escape_xml(&label)
        ));
    }
    out.push_str("</g>");
    out
}

/// FNV-1a, stable across runs so colors are too
fn name_hash(name: &str) -> u64 {
    name.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn get_node_color(name: &str, palette: FlamegraphPalette) -> String {
    let hash = name_hash(name);
    let a = (hash % 55) as u8;
    let b = ((hash >> 8) % 80) as u8;
    match palette {
        FlamegraphPalette::Hot => format!("rgb({}, {}, {})", 200 + a, 90 + b + a, a),
        FlamegraphPalette::Cool => format!("rgb({}, {}, {})", a, 120 + b, 180 + a),
    }
}

fn get_ansi_color(name: &str) -> &'static str {
    const COLORS: [&str; 5] = ["\x1b[31m", "\x1b[33m", "\x1b[35m", "\x1b[32m", "\x1b[36m"];
    COLORS[(name_hash(name) % COLORS.len() as u64) as usize]
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Create a text summary of the hottest stacks with percentages
///
/// `stacks` should already be sorted hottest first, as
/// `MergedStackTree::collapsed()` returns them.
pub fn generate_text_summary(stacks: &[CollapsedStack], max_lines: usize, total_samples: u64) -> String {
    let mut lines = Vec::new();

    lines.push("  HOT STACKS".to_string());
    lines.push("  ┏━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┳━━━━━━━━━━━━━━┳━━━━━━━━━┓".to_string());
    lines.push(format!("  ┃ {:<42} ┃ {:^12} ┃ {:^7} ┃", "Stack (Hottest First)", "SAMPLES", "%"));
    lines.push("  ┣━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━╋━━━━━━━━━━━━━━╋━━━━━━━━━┫".to_string());

    let total = total_samples.max(1);

    for stack in stacks.iter().take(max_lines) {
        let percentage = (stack.weight as f64 / total as f64) * 100.0;

        let leaf = stack.stack.rsplit(';').next().unwrap_or(&stack.stack);
        let color = get_ansi_color(leaf);
        let reset = "\x1b[0m";

        // Keep the innermost frames when the stack is too long
        let char_count = stack.stack.chars().count();
        let display_stack = if char_count > 42 {
            let tail: String = stack.stack.chars().skip(char_count - 39).collect();
            format!("...{}", tail)
        } else {
            stack.stack.clone()
        };

        lines.push(format!(
            "  ┃ {}{:<42}{} ┃ {:>12} ┃ {:>6.1}% ┃",
            color, display_stack, reset, stack.weight, percentage
        ));
    }

    lines.push("  ┗━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┻━━━━━━━━━━━━━━┻━━━━━━━━━┛".to_string());

    if stacks.len() > max_lines {
        lines.push(String::new());
        lines.push(format!("   (Showing top {} of {} unique stacks)", max_lines, stacks.len()));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stacks() -> Vec<CollapsedStack> {
        vec![
            CollapsedStack::new("main;handle;query".to_string(), 6),
            CollapsedStack::new("main;handle<T>".to_string(), 3),
            CollapsedStack::new("main".to_string(), 1),
        ]
    }

    #[test]
    fn test_empty_stacks_rejected() {
        assert!(matches!(generate_flamegraph(&[], None), Err(FlamegraphError::EmptyStacks)));
    }

    #[test]
    fn test_svg_contains_frames_and_total() {
        let config = FlamegraphConfig::new().with_title("GET /orders");
        let svg = generate_flamegraph(&stacks(), Some(&config)).unwrap();

        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("GET /orders"));
        assert!(svg.contains("query (6 samples, 60.00%)"));
        assert!(svg.contains("handle&lt;T&gt;"));
        assert!(svg.contains("10 samples"));
    }

    #[test]
    fn test_shared_prefixes_merge_into_one_frame() {
        let stacks = stacks();
        let (frames, total) = merge_frames(&stacks);
        assert_eq!(total, 10);

        let main: Vec<_> = frames.iter().filter(|f| f.name == "main").collect();
        assert_eq!(main.len(), 1);
        assert_eq!((main[0].start, main[0].end, main[0].depth), (0, 10, 1));

        let handle = frames.iter().find(|f| f.name == "handle").unwrap();
        assert_eq!(handle.samples(), 6);
        let query = frames.iter().find(|f| f.name == "query").unwrap();
        assert_eq!((query.start, query.end, query.depth), (handle.start, handle.end, 3));
    }

    #[test]
    fn test_zero_weight_stacks_draw_nothing() {
        let stacks = vec![
            CollapsedStack::new("main;idle".to_string(), 0),
            CollapsedStack::new("main;work".to_string(), 2),
        ];
        let svg = generate_flamegraph(&stacks, None).unwrap();
        assert!(!svg.contains("idle"));
        assert!(svg.contains("work (2 samples, 100.00%)"));
    }

    #[test]
    fn test_colors_are_stable() {
        assert_eq!(
            get_node_color("main", FlamegraphPalette::Hot),
            get_node_color("main", FlamegraphPalette::Hot)
        );
        assert_ne!(
            get_node_color("main", FlamegraphPalette::Hot),
            get_node_color("main", FlamegraphPalette::Cool)
        );
    }

    #[test]
    fn test_text_summary_limits_lines() {
        let summary = generate_text_summary(&stacks(), 2, 10);
        assert!(summary.contains("main;handle;query"));
        assert!(summary.contains("60.0%"));
        assert!(!summary.contains("10.0%"));
        assert!(summary.contains("Showing top 2 of 3 unique stacks"));
    }
}
