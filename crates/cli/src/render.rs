//! Plain-text and JSON output for the subcommands.

use anyhow::Result;
use flowsort_core::layout::Layout;
use flowsort_core::reports::{CleanupReport, CollectionReport, FileFailure, RetagReport, TransitionReport};
use flowsort_core::status::StatusReport;
use flowsort_core::tags::{join_tags, TagSet};
use flowsort_core::{ClassificationResult, Stage};
use serde::Serialize;
use std::path::Path;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_failures(failures: &[FileFailure]) {
    for f in failures {
        println!("  failed: {} ({:?}): {}", f.path.display(), f.kind, f.reason);
    }
}

fn print_interrupted(interrupted: bool) {
    if interrupted {
        println!("  interrupted before all files were processed");
    }
}

pub fn layout(layout: &Layout) {
    for stage in Stage::ALL {
        println!("{:<10} {}", stage.label(), layout.root(stage).display());
    }
    println!("{:<10} {}", "SYSTEM", layout.system_dir().display());
}

pub fn collection(report: &CollectionReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    for c in &report.collected {
        println!(
            "{} -> {} [{} {:.2}]",
            c.source.display(),
            c.stored.display(),
            c.category,
            c.confidence
        );
        for d in &c.degraded {
            println!("  degraded: {d}");
        }
    }
    println!("collect summary: {}", report.summary());
    print_failures(&report.failures);
    print_interrupted(report.interrupted);
    Ok(())
}

pub fn transitions(report: &TransitionReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    for m in &report.moved {
        println!(
            "{} {} -> {} {}",
            m.from_stage,
            m.from.display(),
            m.to_stage,
            m.to.display()
        );
        for d in &m.degraded {
            println!("  degraded: {d}");
        }
    }
    println!(
        "sweep summary: {} (examined {})",
        report.summary(),
        report.examined
    );
    print_failures(&report.failures);
    print_interrupted(report.interrupted);
    Ok(())
}

pub fn cleanup(report: &CleanupReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    for link in &report.removed {
        println!("removed broken link {}", link.display());
    }
    for link in &report.created {
        println!("created link {}", link.display());
    }
    println!("cleanup summary: {}", report.summary());
    print_failures(&report.failures);
    print_interrupted(report.interrupted);
    Ok(())
}

pub fn retag(report: &RetagReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    for r in report.retagged.iter().filter(|r| r.relinked) {
        println!(
            "{}: {} -> {}",
            r.path.display(),
            r.previous.as_deref().unwrap_or("?"),
            r.category
        );
    }
    println!("retag summary: {}", report.summary());
    print_failures(&report.failures);
    print_interrupted(report.interrupted);
    Ok(())
}

pub fn status(report: &StatusReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    for s in &report.stages {
        println!("{} ({}): {} files", s.stage, s.path.display(), s.total_files);
        for (category, count) in &s.categories {
            println!("  {:<16} {}", category, count);
        }
        if let Some(classified) = s.classified_files {
            println!("  classified       {}", classified);
        }
        if s.broken_links > 0 {
            println!("  broken links     {}", s.broken_links);
        }
    }
    println!("broken links total: {}", report.broken_links);
    Ok(())
}

pub fn classification(file: &Path, result: &ClassificationResult, json: bool) -> Result<()> {
    if json {
        return print_json(result);
    }
    println!(
        "{}: {} (confidence {:.2}, {:?})",
        file.display(),
        result.category,
        result.confidence,
        result.method
    );
    if result.is_ambiguous() {
        println!("  no category matched; it would be filed under misc");
    }
    Ok(())
}

pub fn tags(file: &Path, tags: &TagSet, json: bool) -> Result<()> {
    if json {
        return print_json(tags);
    }
    println!("{}", file.display());
    println!("  category:  {}", tags.category.as_deref().unwrap_or("-"));
    if let Some(confidence) = tags.confidence {
        println!("  confidence: {:.2}", confidence);
    }
    println!("  flowsort:  {}", join_tags(&tags.flowsort_tags));
    println!("  xdg:       {}", join_tags(&tags.xdg_tags));
    Ok(())
}
