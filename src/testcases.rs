//! Test battery loading
//!
//! A battery file holds one comma-separated integer array per line. Each
//! array becomes a test case whose expected output is its ascending sort.

use anyhow::{Context, Result};
use tracing::info;

use crate::core::NewTestCase;
use crate::storage::StorageClient;
use crate::store::SubmissionStore;

/// Parse a battery file into arrays; blank lines are skipped
pub fn parse_battery(text: &str) -> Result<Vec<Vec<i64>>> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .map(|(line_no, line)| {
            line.split(',')
                .map(|item| {
                    item.trim()
                        .parse::<i64>()
                        .with_context(|| format!("Invalid integer {:?} on line {}", item, line_no))
                })
                .collect::<Result<Vec<i64>>>()
        })
        .collect()
}

/// best_case, worst_case or random
pub fn classify_difficulty(input: &[i64]) -> &'static str {
    if input.windows(2).all(|w| w[0] <= w[1]) {
        "best_case"
    } else if input.len() > 1 && input.windows(2).all(|w| w[0] >= w[1]) {
        "worst_case"
    } else {
        "random"
    }
}

/// small (< 1000 elements), medium (< 10000) or large
pub fn size_category(len: usize) -> &'static str {
    match len {
        0..=999 => "small",
        1000..=9999 => "medium",
        _ => "large",
    }
}

/// Turn parsed arrays into test cases named after their position and length
pub fn battery_from_arrays(arrays: Vec<Vec<i64>>) -> Vec<NewTestCase> {
    arrays
        .into_iter()
        .enumerate()
        .map(|(idx, input)| NewTestCase {
            name: format!("Test Case {} ({} elements)", idx + 1, input.len()),
            category: size_category(input.len()).to_string(),
            difficulty: Some(classify_difficulty(&input).to_string()),
            input,
        })
        .collect()
}

fn sample(name: &str, category: &str, difficulty: &str, input: Vec<i64>) -> NewTestCase {
    NewTestCase {
        name: name.to_string(),
        category: category.to_string(),
        difficulty: Some(difficulty.to_string()),
        input,
    }
}

/// Built-in battery used when no battery file is configured
pub fn sample_battery() -> Vec<NewTestCase> {
    vec![
        sample("Small Sorted Array", "small", "best_case", (0..100).collect()),
        sample("Small Reverse Array", "small", "worst_case", (1..=100).rev().collect()),
        sample(
            "Small Random Array",
            "small",
            "random",
            vec![64, 34, 25, 12, 22, 11, 90, 5, 77, 30, 88, 76, 50, 42, 13, 27, 96, 4, 47, 82],
        ),
        sample("Medium Sorted Array", "medium", "best_case", (0..1000).collect()),
        sample("Medium Reverse Array", "medium", "worst_case", (1..=1000).rev().collect()),
        sample("Single Element", "small", "best_case", vec![42]),
        sample("Empty Array", "small", "best_case", vec![]),
        sample("Two Elements Sorted", "small", "best_case", vec![1, 2]),
        sample("Two Elements Reverse", "small", "worst_case", vec![2, 1]),
        sample(
            "Duplicates Array",
            "small",
            "random",
            vec![5, 2, 8, 2, 9, 1, 5, 5, 3, 7, 2, 8, 1, 9, 5],
        ),
    ]
}

/// Where the worker takes its battery from
#[derive(Debug, Clone, PartialEq)]
pub enum BatterySource {
    /// Object key in S3/MinIO
    Remote(String),
    /// Local file path
    File(String),
    Samples,
}

impl BatterySource {
    /// `TESTCASES_S3_KEY`, then `TESTCASES_FILE`, then the samples
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup("TESTCASES_S3_KEY").filter(|k| !k.is_empty()) {
            BatterySource::Remote(key)
        } else if let Some(path) = lookup("TESTCASES_FILE").filter(|p| !p.is_empty()) {
            BatterySource::File(path)
        } else {
            BatterySource::Samples
        }
    }

    pub async fn load(&self) -> Result<Vec<NewTestCase>> {
        match self {
            BatterySource::Remote(key) => {
                let storage = StorageClient::from_env().await?;
                let text = storage.download_string(key).await?;
                Ok(battery_from_arrays(parse_battery(&text)?))
            }
            BatterySource::File(path) => {
                let text = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("Failed to read battery file {}", path))?;
                Ok(battery_from_arrays(parse_battery(&text)?))
            }
            BatterySource::Samples => Ok(sample_battery()),
        }
    }
}

/// Insert the battery when the store holds no test cases; returns how many were added
pub async fn seed_if_empty(store: &dyn SubmissionStore, source: &BatterySource) -> Result<usize> {
    if !store.list_test_cases().await?.is_empty() {
        return Ok(0);
    }
    let battery = source.load().await?;
    let count = battery.len();
    for tc in battery {
        store.insert_test_case(tc).await?;
    }
    info!("Seeded {} test cases from {:?}", count, source);
    Ok(count)
}
