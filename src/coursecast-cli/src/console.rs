//! Terminal rendering for one-shot generation.

use std::sync::{Arc, Mutex};

use colored::Colorize;
use coursecast_core::{CourseRecord, EventSink, ServerEvent};

const RULE_WIDTH: usize = 70;

pub fn rule_heavy() -> String {
    "═".repeat(RULE_WIDTH)
}

pub fn rule_light() -> String {
    "─".repeat(RULE_WIDTH)
}

/// A sink printing stage changes, the final summary and failures.
pub fn console_sink() -> EventSink {
    let last_stage = Mutex::new(String::new());
    Arc::new(move |event: ServerEvent| match event {
        ServerEvent::EnhancedProgress(status) => {
            let mut last = last_stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if *last == status.current_stage.id {
                return;
            }
            last.clone_from(&status.current_stage.id);
            println!(
                "{} {} {}",
                "▶".bright_cyan(),
                status.current_stage.name.bright_cyan().bold(),
                format!("({:.0}%)", status.overall_progress).yellow()
            );
            if !status.current_stage.description.is_empty() {
                println!("  {}", status.current_stage.description.dimmed());
            }
        }
        ServerEvent::CourseComplete(done) => {
            let summary = &done.summary;
            println!();
            println!("{}", rule_heavy().bright_blue());
            println!("{}", format!("  {}", done.course.title()).bright_green().bold());
            println!("{}", rule_heavy().bright_blue());
            println!(
                "  {} slides, {} images, {} narrations in {}",
                summary.total_slides,
                summary.total_images,
                summary.audio_files_count,
                summary.generation_time
            );
            if let Some(file) = &summary.presentation_file {
                println!("  {} {}", "Deck:".bold(), file.bright_white());
            }
        }
        ServerEvent::CourseError(failed) => {
            eprintln!(
                "{} {} {}",
                "Error:".red().bold(),
                failed.error,
                format!("(during {})", failed.stage).dimmed()
            );
        }
        _ => {}
    })
}

/// Print every slide title with its narration, wrapped and indented.
pub fn print_slides(course: &CourseRecord) {
    println!();
    println!("{}", "Slides:".bold());
    for slide in &course.slides {
        println!(
            "{} {}",
            format!("{:>3}.", slide.slide_number).bright_cyan(),
            slide.title.bright_cyan().bold()
        );
        for line in textwrap(&slide.transcript, RULE_WIDTH - 6).lines() {
            println!("      {}", line.dimmed());
        }
        println!();
    }
}

/// Greedy word wrap at `width` columns.
pub fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_line_len + word_len + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word_len;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textwrap_breaks_on_width() {
        let wrapped = textwrap("one two three four five", 9);
        assert_eq!(wrapped, "one two\nthree\nfour five");
    }

    #[test]
    fn test_textwrap_keeps_long_words_whole() {
        assert_eq!(textwrap("supercalifragilistic ok", 5), "supercalifragilistic\nok");
        assert_eq!(textwrap("   ", 10), "");
    }

    #[test]
    fn test_textwrap_counts_characters_not_bytes() {
        assert_eq!(textwrap("über straße", 11), "über straße");
    }
}
