use patchwise_pipeline::PipelineRun;
use patchwise_vector_store::RetrievedChunk;
use std::fmt::Write as _;

pub fn render_hits(hits: &[RetrievedChunk]) -> String {
    let mut out = String::new();
    for (rank, hit) in hits.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {} #{} (line ~{}, score {:.3})",
            rank + 1,
            hit.metadata.source_file,
            hit.metadata.ordinal,
            hit.metadata.approx_start_line,
            hit.similarity_score
        );
        for line in hit.chunk_text.lines() {
            let _ = writeln!(out, "    {line}");
        }
        out.push('\n');
    }
    out
}

/// Final patch followed by the review
pub fn render_run(run: &PipelineRun, review: &str) -> String {
    let language = run.source.language_name();
    let mut md = String::new();
    let _ = writeln!(md, "# Repair of `{}`\n", run.source.filename);

    let faults = run.faults.as_ref().map_or(0, Vec::len);
    let applied = run.snapshots.as_ref().map_or(0, Vec::len);
    let _ = writeln!(md, "- Faults: `{faults}`");
    let _ = writeln!(md, "- Patches applied: `{applied}`\n");

    if let Some(patch) = run.final_patch() {
        let _ = writeln!(md, "### Final Patch\n\n```{language}\n{}\n```\n", patch.trim_end());
    }
    md.push_str(review);
    md
}
