//! Plain-text rendering of engine results for the terminal.

use jurisnexus_core::{
    MergedOutput, ModelCallRecord, PipelineResult, PromptTemplate, Provenance, Review,
};
use jurisnexus_engine::{EngineStats, PassReport, SessionSummary};
use jurisnexus_store::LearningEntry;
use serde::Serialize;

const MAX_PREVIEW_CHARS: usize = 72;

// ── Public API ──

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a pipeline result: header, notices, merged output, then the call log.
pub fn print_result(result: &PipelineResult) {
    println!("=== {} ({}) ===", result.task_id, result.task_type);
    println!("  {:<14} {}", "outcome", result.outcome);
    if let Some(score) = result.quality_score {
        println!("  {:<14} {score}/10", "quality");
    }
    println!("  {:<14} {} ms", "duration", result.duration_ms());
    for notice in &result.notices {
        println!("  ! {notice}");
    }
    println!();

    match &result.merged_output {
        MergedOutput::RiskFindings(report) => {
            println!("Risk findings");
            for finding in &report.findings {
                println!(
                    "  {}{}",
                    finding.clause_id,
                    provenance_tag(finding.provenance)
                );
                for risk in &finding.risks {
                    let added = if risk.added_by_review { " (review)" } else { "" };
                    println!("    [{}]{added} {}", risk.severity, risk.description);
                    if let Some(basis) = &risk.legal_basis {
                        println!("      basis: {basis}");
                    }
                    if !risk.recommendation.is_empty() {
                        println!("      fix:   {}", risk.recommendation);
                    }
                }
            }
            if let Some(narrative) = &report.narrative {
                println!("{narrative}");
            }
            println!("  {}", report.summary.overall);
            print_review(report.review.as_ref());
        }
        MergedOutput::Answer(answer) => {
            println!("Answer{}", provenance_tag(answer.provenance));
            println!("{}", answer.text);
            print_review(answer.review.as_ref());
        }
        MergedOutput::Memo(memo) => {
            println!("Memo{}", provenance_tag(memo.provenance));
            for section in &memo.sections {
                if !section.heading.is_empty() {
                    println!("## {}", section.heading);
                }
                println!("{}", section.body);
                println!();
            }
            print_review(memo.review.as_ref());
        }
        MergedOutput::Failure(notice) => {
            println!("FAILED at {}: {}", notice.stage, notice.reason);
        }
    }
    println!();

    println!("Model calls");
    for record in result.records() {
        print_call(record);
    }
}

pub fn print_stats(stats: &EngineStats) {
    let l = &stats.learning;
    println!("Runs");
    println!("  {:<16} {}", "total", l.total_runs);
    for (outcome, count) in &l.by_outcome {
        println!("  {:<16} {count}", outcome);
    }
    println!("  {:<16} {:.1}%", "success rate", l.success_rate);
    if let Some(q) = l.average_quality {
        println!("  {:<16} {q:.2}", "avg quality");
    }
    if let Some(q) = l.recent_quality {
        println!("  {:<16} {q:.2}", "recent quality");
    }
    println!("  {:<16} {}", "mocked calls", l.mocked_calls);
    println!("  {:<16} {}", "cached calls", l.cached_calls);
    println!("  {:<16} {}", "cancelled", l.cancelled_runs);
    println!();

    println!("Feedback");
    println!("  {:<16} {}", "ratings", stats.feedback.count);
    if let Some(mean) = stats.feedback.mean {
        println!("  {:<16} {mean:.2} ({})", "mean", stats.feedback.trend);
    }
    println!("  {:<16} {:?}", "distribution", stats.feedback.distribution);
    println!();

    if !stats.per_template.is_empty() {
        println!("Templates");
        for (id, fb) in &stats.per_template {
            let mean = fb.mean.map(|m| format!("{m:.2}")).unwrap_or_else(|| "-".into());
            println!("  {:<40} n={:<4} mean={mean:<5} {}", id, fb.count, fb.trend);
        }
    }
}

pub fn print_templates(templates: &[PromptTemplate]) {
    for t in templates {
        let state = match t.retired_at {
            Some(at) => format!("retired {}", at.format("%Y-%m-%d %H:%M")),
            None => "active".to_string(),
        };
        let language = t.language.as_deref().unwrap_or("any");
        println!("{:<44} {:<8} {:<4} {state}", t.template_id, t.tier, language);
        if let Some(note) = &t.change_note {
            println!("    {}", preview(note));
        }
    }
}

pub fn print_pass(report: &PassReport) {
    println!(
        "examined {} rated templates, {} revised, {} conflicts",
        report.examined,
        report.revisions.len(),
        report.conflicts
    );
    for r in &report.revisions {
        let how = if r.rewritten { "rewrite" } else { "guidance" };
        println!(
            "  {} -> {} (mean {:.2} over {}, {how})",
            r.retired, r.created, r.mean_rating, r.samples
        );
    }
}

pub fn print_sessions(sessions: &[SessionSummary]) {
    for s in sessions {
        let state = if s.closed { "closed" } else { "open" };
        println!(
            "{:<40} {:<6} {:>3} turns  last active {}",
            s.session_id,
            state,
            s.turns,
            s.last_active_at.format("%Y-%m-%d %H:%M")
        );
    }
}

pub fn print_runs(runs: &[LearningEntry]) {
    for run in runs {
        let quality = run
            .result
            .quality_score
            .map(|q| format!("{q}/10"))
            .unwrap_or_else(|| "-".into());
        let cancelled = if run.caller_cancelled { " (abandoned)" } else { "" };
        println!(
            "{} {:<40} {:<14} {:<22} {quality:>5}{cancelled}",
            run.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            run.task_id(),
            run.result.task_type.to_string(),
            run.result.outcome.to_string(),
        );
        println!("    {}", preview(&run.task.input_text));
    }
}

// ── Helpers ──

fn print_review(review: Option<&Review>) {
    let Some(review) = review else {
        return;
    };
    let score = review
        .quality_score
        .map(|s| format!("{s}/10"))
        .unwrap_or_else(|| "unscored".into());
    let refined = if review.refined { ", refined" } else { "" };
    println!();
    println!(
        "Review ({score}{refined}){}",
        provenance_tag(review.provenance)
    );
    if !review.feedback.is_empty() {
        println!("  {}", review.feedback);
    }
}

fn print_call(record: &ModelCallRecord) {
    let detail = match (&record.error, &record.response_text) {
        (Some(e), _) => preview(e),
        (None, Some(text)) => preview(text),
        (None, None) => String::new(),
    };
    let cached = if record.cached { " cached" } else { "" };
    println!(
        "  {:<7} {:<7}{cached} {:>6} ms  x{}  {}",
        record.tier.to_string(),
        record.status.as_str(),
        record.latency_ms,
        record.attempts,
        record.template_id
    );
    if !detail.is_empty() {
        println!("          {detail}");
    }
}

fn provenance_tag(provenance: Provenance) -> &'static str {
    match provenance {
        Provenance::Model => "",
        Provenance::Mocked => " [mocked]",
    }
}

fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default().trim();
    if line.chars().count() > MAX_PREVIEW_CHARS {
        let cut: String = line.chars().take(MAX_PREVIEW_CHARS).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}
