use std::fmt::Write as _;
use std::path::Path;

use knownface_core::{GallerySnapshot, MatchError, QueryResult};
use serde_json::json;

/// Message shown when the query image has no detectable face.
pub const NO_FACES_MESSAGE: &str = "No faces detected in the uploaded image";

pub fn render_match(result: &QueryResult, as_json: bool) -> anyhow::Result<String> {
    if as_json {
        return Ok(serde_json::to_string_pretty(result)?);
    }

    let mut out = result.message();
    for face in &result.faces {
        let r = &face.region;
        let _ = write!(
            out,
            "\n  face #{} at ({:.0}, {:.0}, {:.0}×{:.0}):",
            face.face_index, r.x, r.y, r.width, r.height
        );
        if face.matches.is_empty() {
            out.push_str(" no match");
        }
        for hit in &face.matches {
            let _ = write!(out, " {} (distance {:.4})", hit.id, hit.distance);
        }
    }
    Ok(out)
}

pub fn render_failure(err: &MatchError, as_json: bool) -> String {
    if as_json {
        return json!({
            "error": err.code(),
            "message": err.to_string(),
        })
        .to_string();
    }

    match err {
        MatchError::NoFacesDetected => NO_FACES_MESSAGE.to_string(),
        other => format!("error: {other}"),
    }
}

pub fn render_gallery(root: &Path, snapshot: &GallerySnapshot, as_json: bool) -> anyhow::Result<String> {
    if as_json {
        let value = json!({
            "root": root,
            "summary": snapshot.summary(),
            "identities": snapshot
                .entries()
                .iter()
                .map(|e| json!({ "id": e.id, "embeddings": e.embeddings.len(), "sources": e.sources }))
                .collect::<Vec<_>>(),
        });
        return Ok(serde_json::to_string_pretty(&value)?);
    }

    let mut out = String::new();
    let _ = writeln!(out, "gallery:     {}", root.display());
    let _ = writeln!(out, "fingerprint: {}", snapshot.fingerprint());
    let _ = writeln!(out, "model:       {}", snapshot.model_version());
    let _ = write!(
        out,
        "identities:  {} ({} embeddings)",
        snapshot.len(),
        snapshot.embedding_count()
    );
    for entry in snapshot.entries() {
        let _ = write!(out, "\n  {}  {} embedding(s)", entry.id, entry.embeddings.len());
    }
    if !snapshot.skipped().is_empty() {
        let _ = write!(out, "\nskipped:     {}", snapshot.skipped().len());
        for skipped in snapshot.skipped() {
            let _ = write!(out, "\n  {}: {}", skipped.path.display(), skipped.reason);
        }
    }
    Ok(out)
}
