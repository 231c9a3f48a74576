mod ai;
mod compare;
mod db;
mod error;
mod mail;
mod models;
mod outbound;
mod pipeline;
mod resolve;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ai::GeminiClient;
use db::Database;
use mail::{MailboxConfig, MailboxWatcher};
use models::{ProposalStatus, RfpStatus};
use pipeline::IngestOutcome;

#[derive(Parser)]
#[command(name = "tender")]
#[command(about = "Procurement pipeline - draft RFPs, ingest vendor replies, compare bids")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage vendors
    Vendor {
        #[command(subcommand)]
        command: VendorCommands,
    },

    /// Manage RFPs
    Rfp {
        #[command(subcommand)]
        command: RfpCommands,
    },

    /// Inspect received proposals
    Proposal {
        #[command(subcommand)]
        command: ProposalCommands,
    },

    /// Run a stored email file through the ingestion pipeline
    ParseEmail {
        /// Path to a raw RFC822 message file
        file: PathBuf,
    },

    /// Poll the mailbox once and process unseen messages
    Ingest,

    /// Watch the mailbox, polling every five minutes
    Watch,

    /// Compare all proposals received for an RFP
    Compare {
        /// RFP ID
        rfp_id: i64,
    },
}

#[derive(Subcommand)]
enum VendorCommands {
    /// Register a vendor
    Add {
        /// Vendor name
        name: String,

        /// Contact email (the address proposals will arrive from)
        email: String,

        /// Contact person
        #[arg(short, long)]
        contact: Option<String>,

        /// Phone number
        #[arg(short, long)]
        phone: Option<String>,

        /// Postal address
        #[arg(short, long)]
        address: Option<String>,
    },

    /// List all vendors
    List,
}

#[derive(Subcommand)]
enum RfpCommands {
    /// Create an RFP from a free-text procurement description
    Create {
        /// What you need, in plain language
        description: String,
    },

    /// List RFPs
    List {
        /// Filter by status (draft, sent, closed)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Show RFP details
    Show {
        /// RFP ID
        id: i64,
    },

    /// Render the outbound email for an RFP and mark it sent
    Send {
        /// RFP ID
        id: i64,
    },

    /// Close an RFP to further consideration
    Close {
        /// RFP ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum ProposalCommands {
    /// List proposals received for an RFP
    List {
        /// RFP ID
        rfp_id: i64,
    },

    /// Show proposal details
    Show {
        /// Proposal ID
        id: i64,
    },

    /// Update a proposal's review status
    Mark {
        /// Proposal ID
        id: i64,

        /// New status (received, reviewed, accepted, rejected)
        status: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tender=info")),
        )
        .init();

    let cli = Cli::parse();
    let db = Database::open()?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            match db.path() {
                Some(path) => println!("Database initialized at {}", path.display()),
                None => println!("Database initialized."),
            }
        }

        Commands::Vendor { command } => {
            db.ensure_initialized()?;
            match command {
                VendorCommands::Add {
                    name,
                    email,
                    contact,
                    phone,
                    address,
                } => {
                    let vendor = db.create_vendor(
                        &name,
                        &email,
                        contact.as_deref(),
                        phone.as_deref(),
                        address.as_deref(),
                    )?;
                    println!("Added vendor '{}' (ID: {})", vendor.name, vendor.id);
                }

                VendorCommands::List => {
                    let vendors = db.list_vendors()?;
                    if vendors.is_empty() {
                        println!("No vendors found.");
                    } else {
                        println!("{:<6} {:<25} {:<30} {:<20}", "ID", "NAME", "EMAIL", "CONTACT");
                        println!("{}", "-".repeat(83));
                        for vendor in vendors {
                            println!(
                                "{:<6} {:<25} {:<30} {:<20}",
                                vendor.id,
                                truncate(&vendor.name, 23),
                                truncate(&vendor.email, 28),
                                truncate(&vendor.contact_person.unwrap_or_default(), 18)
                            );
                        }
                    }
                }
            }
        }

        Commands::Rfp { command } => {
            db.ensure_initialized()?;
            match command {
                RfpCommands::Create { description } => {
                    let model = GeminiClient::from_env()?;
                    let fields = ai::synthesize_rfp(&model, &description).await?;
                    let rfp = db.create_rfp(&fields, &description)?;
                    println!("Created RFP #{}: {}", rfp.id, rfp.title);
                    println!("Status: {}", rfp.status.as_str());
                    println!("Use 'tender rfp send {}' to mark it sent.", rfp.id);
                }

                RfpCommands::List { status } => {
                    let status = match status.as_deref() {
                        Some(s) => Some(
                            RfpStatus::parse(s)
                                .ok_or_else(|| anyhow!("unknown RFP status '{}'", s))?,
                        ),
                        None => None,
                    };
                    let rfps = db.list_rfps(status)?;
                    if rfps.is_empty() {
                        println!("No RFPs found.");
                    } else {
                        println!("{:<6} {:<8} {:<40} {:>12}", "ID", "STATUS", "TITLE", "BUDGET");
                        println!("{}", "-".repeat(68));
                        for rfp in rfps {
                            let budget = match rfp.budget {
                                Some(b) => format!("${b:.2}"),
                                None => "-".to_string(),
                            };
                            println!(
                                "{:<6} {:<8} {:<40} {:>12}",
                                rfp.id,
                                rfp.status.as_str(),
                                truncate(&rfp.title, 38),
                                budget
                            );
                        }
                    }
                }

                RfpCommands::Show { id } => match db.get_rfp(id)? {
                    Some(rfp) => {
                        println!("RFP #{}", rfp.id);
                        println!("Title: {}", rfp.title);
                        println!("Status: {}", rfp.status.as_str());
                        if let Some(budget) = rfp.budget {
                            println!("Budget: ${budget:.2}");
                        }
                        if let Some(deadline) = &rfp.deadline {
                            println!("Deadline: {deadline}");
                        }
                        println!("Created: {}", rfp.created_at);
                        println!("\n{}", rfp.description);
                        if !rfp.requirements.is_empty() {
                            println!("\nRequirements:");
                            for req in &rfp.requirements {
                                match req.quantity {
                                    Some(qty) => println!("  - {} (qty: {})", req.item, qty),
                                    None => println!("  - {}", req.item),
                                }
                                for (key, value) in &req.specifications {
                                    println!("      {key}: {value}");
                                }
                            }
                        }
                        let proposals = db.list_proposals(rfp.id)?;
                        if !proposals.is_empty() {
                            println!("\nProposals ({}):", proposals.len());
                            for p in proposals {
                                println!(
                                    "  #{} - {} ({})",
                                    p.id,
                                    p.vendor_name.unwrap_or_else(|| format!("vendor {}", p.vendor_id)),
                                    p.status.as_str()
                                );
                            }
                        }
                    }
                    None => println!("RFP #{id} not found."),
                },

                RfpCommands::Send { id } => {
                    let rfp = db
                        .get_rfp(id)?
                        .ok_or_else(|| anyhow!("RFP #{} not found", id))?;
                    println!("Subject: {}", outbound::rfp_email_subject(&rfp));
                    println!("\n{}", outbound::render_rfp_email(&rfp));
                    db.set_rfp_status(id, RfpStatus::Sent)?;
                    println!("Marked RFP #{id} as sent. Vendor replies will now match it.");
                }

                RfpCommands::Close { id } => {
                    db.set_rfp_status(id, RfpStatus::Closed)?;
                    println!("Closed RFP #{id}.");
                }
            }
        }

        Commands::Proposal { command } => {
            db.ensure_initialized()?;
            match command {
                ProposalCommands::List { rfp_id } => {
                    let proposals = db.list_proposals(rfp_id)?;
                    if proposals.is_empty() {
                        println!("No proposals received for RFP #{rfp_id}.");
                    } else {
                        println!(
                            "{:<6} {:<25} {:<10} {:>8} {:<20}",
                            "ID", "VENDOR", "STATUS", "SCORE", "RECEIVED"
                        );
                        println!("{}", "-".repeat(72));
                        for p in proposals {
                            let score = match p.ai_score {
                                Some(s) => format!("{s:.1}"),
                                None => "-".to_string(),
                            };
                            println!(
                                "{:<6} {:<25} {:<10} {:>8} {:<20}",
                                p.id,
                                truncate(
                                    &p.vendor_name
                                        .unwrap_or_else(|| format!("vendor {}", p.vendor_id)),
                                    23
                                ),
                                p.status.as_str(),
                                score,
                                truncate(&p.created_at, 18)
                            );
                        }
                    }
                }

                ProposalCommands::Show { id } => match db.get_proposal(id)? {
                    Some(p) => {
                        println!("Proposal #{} (RFP #{})", p.id, p.rfp_id);
                        if let Some(vendor) = &p.vendor_name {
                            println!("Vendor: {vendor}");
                        }
                        println!("Status: {}", p.status.as_str());
                        println!("Received: {}", p.created_at);
                        if !p.pricing.is_empty() {
                            println!("\nPricing:");
                            for (item, line) in &p.pricing {
                                print!("  {item}:");
                                if let Some(qty) = line.quantity {
                                    print!(" qty {qty}");
                                }
                                if let Some(unit) = line.unit_price {
                                    print!(" @ ${unit:.2}");
                                }
                                match line.total {
                                    Some(total) => println!(" = ${total:.2}"),
                                    None => println!(),
                                }
                            }
                        }
                        if let Some(total) = p.extracted_data.total_price {
                            println!("Total: ${total:.2}");
                        }
                        if let Some(delivery) = &p.terms.delivery_time {
                            println!("Delivery: {delivery}");
                        }
                        if let Some(payment) = &p.terms.payment_terms {
                            println!("Payment: {payment}");
                        }
                        if let Some(warranty) = &p.terms.warranty {
                            println!("Warranty: {warranty}");
                        }
                        if let Some(score) = p.ai_score {
                            println!("\nScore: {score:.1}");
                        }
                        if let Some(summary) = &p.ai_summary {
                            println!("Summary: {summary}");
                        }
                        if let Some(rec) = &p.ai_recommendation {
                            println!("Recommendation: {rec}");
                        }
                        println!("\n--- Email Body ---\n{}", p.email_body);
                    }
                    None => println!("Proposal #{id} not found."),
                },

                ProposalCommands::Mark { id, status } => {
                    let status = ProposalStatus::parse(&status)
                        .ok_or_else(|| anyhow!("unknown proposal status '{}'", status))?;
                    db.set_proposal_status(id, status)?;
                    println!("Marked proposal #{} as {}.", id, status.as_str());
                }
            }
        }

        Commands::ParseEmail { file } => {
            db.ensure_initialized()?;
            let raw = std::fs::read(&file)
                .map_err(|e| anyhow!("cannot read {}: {e}", file.display()))?;
            let model = GeminiClient::from_env()?;
            match pipeline::ingest_message(&db, &model, &raw).await? {
                IngestOutcome::Recorded {
                    proposal_id,
                    rfp_id,
                    vendor_id,
                } => {
                    println!(
                        "Recorded proposal #{proposal_id} (RFP #{rfp_id}, vendor #{vendor_id})."
                    );
                }
                IngestOutcome::UnknownVendor { sender } => {
                    println!("Skipped: sender '{sender}' is not a registered vendor.");
                }
                IngestOutcome::UnmatchedRfp { sender, subject } => {
                    println!("Skipped: no RFP matched subject '{subject}' (from {sender}).");
                }
            }
        }

        Commands::Ingest => {
            db.ensure_initialized()?;
            let config = MailboxConfig::from_env()
                .ok_or_else(|| anyhow!("set IMAP_USER and IMAP_PASSWORD to enable ingestion"))?;
            let model = Arc::new(GeminiClient::from_env()?);
            let watcher = MailboxWatcher::new(config, Arc::new(db), model);
            let stats = watcher.poll_once().await?;
            println!("Messages fetched: {}", stats.fetched);
            println!("Proposals recorded: {}", stats.recorded);
            println!("Skipped: {}", stats.skipped);
            if stats.failed > 0 {
                println!("Failed: {}", stats.failed);
            }
        }

        Commands::Watch => {
            db.ensure_initialized()?;
            let Some(config) = MailboxConfig::from_env() else {
                // Degraded mode, not an error: the rest of the tool still works.
                println!("IMAP_USER and IMAP_PASSWORD are not set; mailbox watching is disabled.");
                return Ok(());
            };
            let model = Arc::new(GeminiClient::from_env()?);
            let watcher = MailboxWatcher::new(config, Arc::new(db), model);
            println!("Watching mailbox (polling every 5 minutes). Ctrl-C to stop.");
            watcher.run().await;
        }

        Commands::Compare { rfp_id } => {
            db.ensure_initialized()?;
            let model = GeminiClient::from_env()?;
            let comparison = compare::run_comparison(&db, &model, rfp_id).await?;
            println!("{}", comparison.summary);
            if !comparison.scores.is_empty() {
                println!("\nScores:");
                let mut ranked: Vec<_> = comparison.scores.iter().collect();
                ranked.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
                for (vendor, score) in ranked {
                    println!("  {vendor}: {score:.1}");
                }
            }
            for (vendor, strengths) in &comparison.strengths {
                println!("\n{vendor} strengths:");
                for s in strengths {
                    println!("  + {s}");
                }
            }
            for (vendor, weaknesses) in &comparison.weaknesses {
                println!("\n{vendor} weaknesses:");
                for w in weaknesses {
                    println!("  - {w}");
                }
            }
            if !comparison.recommendation.is_empty() {
                println!("\nRecommendation: {}", comparison.recommendation);
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}
