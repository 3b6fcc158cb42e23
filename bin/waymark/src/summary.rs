//! Human-readable run summaries.

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use waymark_migrate::{Deployment, DeploymentReport};

use crate::migrations::{FACTORY, WALLET};

/// How a network's run ended, for the final summary and the exit code.
#[derive(Debug)]
pub enum Outcome {
    Migrated {
        report: DeploymentReport,
        executed: Vec<u64>,
    },
    Failed {
        report: DeploymentReport,
        error: String,
        indeterminate: bool,
    },
    /// The run could not start: bad configuration, held lock, unreachable registry setup.
    NotStarted { network: String, error: String },
}

impl Outcome {
    pub fn network(&self) -> &str {
        match self {
            Self::Migrated { report, .. } | Self::Failed { report, .. } => &report.network,
            Self::NotStarted { network, .. } => network,
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            Self::Failed {
                indeterminate: true,
                ..
            }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Migrated { .. })
    }
}

fn step_label(step: Option<u64>) -> String {
    step.map_or_else(|| "-".to_string(), |s| s.to_string())
}

fn base_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn add_deployments<'a>(
    table: &mut Table,
    network: &str,
    deployments: impl IntoIterator<Item = &'a Deployment>,
    note: &str,
) {
    for d in deployments {
        table.add_row(vec![
            network.to_string(),
            d.step_id.to_string(),
            d.name.clone(),
            d.address.to_string(),
            d.transaction_id.to_string(),
            note.to_string(),
        ]);
    }
}

/// One row per network: status, frontier and steps executed.
pub fn outcomes_table(outcomes: &[Outcome]) -> Table {
    let mut table = base_table(vec!["Network", "Status", "Last completed", "Executed", "Detail"]);
    for outcome in outcomes {
        let row = match outcome {
            Outcome::Migrated { report, executed } => vec![
                report.network.clone(),
                "migrated".to_string(),
                step_label(report.last_completed),
                executed
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
                String::new(),
            ],
            Outcome::Failed {
                report,
                error,
                indeterminate,
            } => vec![
                report.network.clone(),
                if *indeterminate {
                    "indeterminate".to_string()
                } else {
                    "failed".to_string()
                },
                step_label(report.last_completed),
                String::new(),
                error.clone(),
            ],
            Outcome::NotStarted { network, error } => vec![
                network.clone(),
                "not started".to_string(),
                "-".to_string(),
                String::new(),
                error.clone(),
            ],
        };
        table.add_row(row);
    }
    table
}

/// One row per network as recorded by its registry and address book.
///
/// `highest` is the id of the last authored step.
pub fn status_table(reports: &[DeploymentReport], highest: Option<u64>) -> Table {
    let mut table = base_table(vec![
        "Network",
        "Registry",
        "Last completed",
        "Pending",
        "Deployments",
    ]);
    for report in reports {
        let pending = highest.unwrap_or(0).saturating_sub(report.last_completed.unwrap_or(0));
        table.add_row(vec![
            report.network.clone(),
            report
                .registry
                .map_or_else(|| "-".to_string(), |a| a.to_string()),
            step_label(report.last_completed),
            pending.to_string(),
            report.deployments.len().to_string(),
        ]);
    }
    table
}

/// Every known deployment, including programs left unrecorded by a halted step.
pub fn deployments_table<'a>(reports: impl IntoIterator<Item = &'a DeploymentReport>) -> Table {
    let mut table = base_table(vec!["Network", "Step", "Name", "Address", "Transaction", ""]);
    for report in reports {
        let recorded = report
            .deployments
            .iter()
            .filter(|d| !report.unrecorded.contains(d));
        add_deployments(&mut table, &report.network, recorded, "");
        add_deployments(&mut table, &report.network, &report.unrecorded, "UNRECORDED");
    }
    table
}

/// Print the end-of-run summary to stdout.
pub fn print_outcomes(outcomes: &[Outcome]) {
    println!("{}", outcomes_table(outcomes));

    let reports = outcomes.iter().filter_map(|o| match o {
        Outcome::Migrated { report, .. } | Outcome::Failed { report, .. } => Some(report),
        Outcome::NotStarted { .. } => None,
    });
    println!("{}", deployments_table(reports.clone()));

    for report in reports {
        if let (Some(wallet), Some(factory)) = (report.get(WALLET), report.get(FACTORY)) {
            println!(
                "{}: wallet factory at {}, wallet implementation at {}",
                report.network, factory.address, wallet.address
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::{Address, B256};

    use super::*;

    fn report(network: &str) -> DeploymentReport {
        let mut report = DeploymentReport::new(network);
        report.last_completed = Some(2);
        report.deployments.push(Deployment {
            name: "Wallet".to_string(),
            address: Address::with_last_byte(0xaa),
            transaction_id: B256::with_last_byte(1),
            network: network.to_string(),
            step_id: 1,
        });
        report
    }

    #[test]
    fn test_outcome_classification() {
        let ok = Outcome::Migrated {
            report: report("devnet"),
            executed: vec![1, 2],
        };
        let stuck = Outcome::Failed {
            report: report("sepolia"),
            error: "not confirmed".to_string(),
            indeterminate: true,
        };
        assert!(ok.is_success());
        assert!(!ok.is_indeterminate());
        assert!(stuck.is_indeterminate());
        assert_eq!(stuck.network(), "sepolia");

        let rendered = outcomes_table(&[ok, stuck]).to_string();
        assert!(rendered.contains("migrated"));
        assert!(rendered.contains("indeterminate"));
    }

    #[test]
    fn test_status_counts_pending_steps() {
        let fresh = DeploymentReport::new("sepolia");

        let rendered = status_table(&[report("devnet"), fresh], Some(3)).to_string();
        assert!(rendered.contains("devnet"));
        assert_eq!(status_table(&[], Some(3)).row_iter().count(), 0);
    }

    #[test]
    fn test_deployments_table_lists_addresses() {
        let mut halted = report("sepolia");
        halted.unrecorded.push(Deployment {
            name: "Factory".to_string(),
            address: Address::with_last_byte(0xbb),
            transaction_id: B256::with_last_byte(2),
            network: "sepolia".to_string(),
            step_id: 2,
        });

        let table = deployments_table([&report("devnet"), &halted]);
        assert_eq!(table.row_iter().count(), 3);
        let rendered = table.to_string();
        assert!(rendered.contains("UNRECORDED"));
    }

    #[test]
    fn test_bound_but_unrecorded_deployment_is_listed_once() {
        let mut stuck = report("sepolia");
        stuck.unrecorded = stuck.deployments.clone();

        let table = deployments_table([&stuck]);
        assert_eq!(table.row_iter().count(), 1);
        assert!(table.to_string().contains("UNRECORDED"));
    }
}
