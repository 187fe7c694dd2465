//! Flamegraph SVG writer.

use super::json::create_output;
use crate::utils::error::OutputError;
use log::{info, warn};
use std::io::Write;
use std::path::Path;

/// Write a rendered flamegraph to `output_path`
///
/// The content must be a complete `<svg>` document; anything else is refused
/// before the file is touched, so a failed render never clobbers an earlier
/// flamegraph.
pub fn write_svg(svg_content: &str, output_path: impl AsRef<Path>) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();
    if !is_svg_document(svg_content) {
        return Err(OutputError::NotSvg(output_path.display().to_string()));
    }
    if output_path.extension().map_or(true, |ext| ext != "svg") {
        warn!("Flamegraph path {} has no .svg extension", output_path.display());
    }

    let mut out = create_output(output_path)?;
    out.write_all(svg_content.as_bytes())?;
    out.flush()?;

    info!("Flamegraph written to {} ({} bytes)", output_path.display(), svg_content.len());
    Ok(())
}

fn is_svg_document(content: &str) -> bool {
    let body = content.trim_start();
    let body = match body.strip_prefix("<?xml") {
        Some(rest) => rest.split_once("?>").map_or("", |(_, after)| after.trim_start()),
        None => body,
    };
    body.starts_with("<svg") && content.trim_end().ends_with("</svg>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flamegraph::generate_flamegraph;
    use crate::profiler::CollapsedStack;

    const TINY_SVG: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"></svg>"#;

    #[test]
    fn test_writes_generated_flamegraph() {
        let stacks = vec![CollapsedStack::new("main;handle".to_string(), 4)];
        let svg = generate_flamegraph(&stacks, None).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/trace.svg");

        write_svg(&svg, &path).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), svg);
    }

    #[test]
    fn test_accepts_xml_prolog() {
        assert!(is_svg_document(&format!("<?xml version=\"1.0\"?>\n{}\n", TINY_SVG)));
        assert!(!is_svg_document("<?xml version=\"1.0\"?><html></html>"));
        assert!(!is_svg_document("<svg>"));
    }

    #[test]
    fn test_refused_content_leaves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.svg");
        write_svg(TINY_SVG, &path).unwrap();

        let err = write_svg("No samples recorded", &path).unwrap_err();

        assert!(matches!(err, OutputError::NotSvg(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), TINY_SVG);
    }

    #[test]
    fn test_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(write_svg(TINY_SVG, dir.path()), Err(OutputError::InvalidPath(_))));
    }
}
