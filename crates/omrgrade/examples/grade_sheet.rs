use omrgrade::{AnswerKey, Grader, ScoringPolicy, SheetImage, SheetLayout};
use std::error::Error;
use std::path::Path;

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 5 {
        eprintln!(
            "Usage: {} <layout.json> <image.png> <key.txt> <policy.json> [out.json]",
            args[0]
        );
        std::process::exit(2);
    }

    let layout = SheetLayout::from_json_file(Path::new(&args[1]))?;
    let image = SheetImage::from_bytes(&std::fs::read(&args[2])?)?;
    let key = AnswerKey::from_lines(&std::fs::read_to_string(&args[3])?)?;
    let policy = ScoringPolicy::from_json_file(Path::new(&args[4]))?;

    let grader = Grader::new();
    let report = grader.analyze(&image, Some(&layout), &key, &policy)?;

    println!(
        "Score {:.2}/{:.2} ({} correct, {} wrong, {} blank, {} invalid).",
        report.total,
        report.max_score,
        report.counts.correct,
        report.counts.wrong,
        report.counts.blank,
        report.counts.invalid
    );
    for q in report.questions.iter().filter(|q| q.provenance != "deterministic") {
        println!("  Q{}: {} via {}", q.question, q.detected, q.provenance);
    }

    if let Some(out_path) = args.get(5) {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(out_path, json)?;
        println!("Wrote {out_path}");
    }
    Ok(())
}
