use std::path::PathBuf;

use clap::Parser;
use storyweaver::cli::{Cli, Commands, StrategyArg};
use storyweaver::domain::models::MergeStrategy;

#[test]
fn test_parse_merge_defaults() {
    let cli = Cli::try_parse_from(["storyweaver", "merge", "stories.json"]).unwrap();

    assert!(!cli.json);
    assert!(cli.config.is_none());
    match cli.command {
        Commands::Merge {
            input,
            output,
            strategy,
            catalog,
        } => {
            assert_eq!(input, PathBuf::from("stories.json"));
            assert!(output.is_none());
            assert!(strategy.is_none());
            assert!(!catalog);
        }
        _ => panic!("Wrong command"),
    }
}

#[test]
fn test_parse_merge_with_options() {
    let cli = Cli::try_parse_from([
        "storyweaver",
        "merge",
        "stories.json",
        "-o",
        "merged.json",
        "--strategy",
        "heuristic",
        "--catalog",
    ])
    .unwrap();

    match cli.command {
        Commands::Merge {
            output,
            strategy,
            catalog,
            ..
        } => {
            assert_eq!(output, Some(PathBuf::from("merged.json")));
            assert_eq!(strategy, Some(StrategyArg::Heuristic));
            assert_eq!(MergeStrategy::from(StrategyArg::Heuristic), MergeStrategy::Heuristic);
            assert!(catalog);
        }
        _ => panic!("Wrong command"),
    }
}

#[test]
fn test_global_flags_after_subcommand() {
    let cli = Cli::try_parse_from([
        "storyweaver",
        "candidates",
        "stories.json",
        "--json",
        "--config",
        "custom.yaml",
    ])
    .unwrap();

    assert!(cli.json);
    assert_eq!(cli.config, Some(PathBuf::from("custom.yaml")));
    assert!(matches!(cli.command, Commands::Candidates { .. }));
}

#[test]
fn test_parse_report() {
    let cli = Cli::try_parse_from(["storyweaver", "-j", "report", "before.json", "after.json"]).unwrap();

    assert!(cli.json);
    match cli.command {
        Commands::Report { original, merged } => {
            assert_eq!(original, PathBuf::from("before.json"));
            assert_eq!(merged, PathBuf::from("after.json"));
        }
        _ => panic!("Wrong command"),
    }
}

#[test]
fn test_invalid_strategy_rejected() {
    let result = Cli::try_parse_from(["storyweaver", "merge", "stories.json", "--strategy", "magic"]);
    assert!(result.is_err());
}

#[test]
fn test_report_requires_both_files() {
    let result = Cli::try_parse_from(["storyweaver", "report", "before.json"]);
    assert!(result.is_err());
}

#[test]
fn test_missing_subcommand_rejected() {
    assert!(Cli::try_parse_from(["storyweaver"]).is_err());
}
