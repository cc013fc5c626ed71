use crate::CLAP_STYLING;
use clap::{arg, command};
use sitegauge::parse_issue_status;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("sitegauge")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("sitegauge")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner and non-essential output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-d --"database" <PATH>)
                .required(false)
                .global(true)
                .help("Path to the sitegauge database (default: $SITEGAUGE_DATABASE or ~/.config/sitegauge/sitegauge.db)"),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Creates the sitegauge database")
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite any existing database without asking")
                        .required(false),
                ),
        )
        .subcommand(
            command!("client")
                .about("Manage the clients whose sites are audited")
                .subcommand_required(true)
                .subcommand(
                    command!("add").about("Registers a client").arg(
                        arg!(-n --"name" <NAME>)
                            .required(true)
                            .help("Display name of the client"),
                    ),
                )
                .subcommand(command!("list").about("List all clients")),
        )
        .subcommand(
            command!("crawl")
                .about("Crawl a client's site, store every page and aggregate the audit")
                .arg(
                    arg!(-c --"client" <CLIENT_ID>)
                        .required(true)
                        .help("The client that owns the site")
                        .value_parser(clap::value_parser!(i64)),
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("Root URL of the site; a bare host gets https://"),
                )
                .arg(
                    arg!(-t --"threads" <NUM_WORKERS>)
                        .required(false)
                        .help("Number of concurrent fetch workers (default: $SITEGAUGE_CRAWL_CONCURRENCY or 10)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"max-depth" <DEPTH>)
                        .required(false)
                        .help("Maximum link depth from the root")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"max-pages" <COUNT>)
                        .required(false)
                        .help("Stop scheduling pages after this many")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"probe-links")
                        .required(false)
                        .help("Resolve the status of canonical targets and internal links")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save the audit report to a file")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, markdown")
                        .value_parser(["text", "json", "markdown"]),
                ),
        )
        .subcommand(
            command!("serve")
                .about("Run the webhook server that receives pages from an external crawl service")
                .arg(
                    arg!(-b --"bind" <ADDR>)
                        .required(false)
                        .help("Address to listen on (default: $SITEGAUGE_BIND or 127.0.0.1:8080)"),
                ),
        )
        .subcommand(
            command!("report")
                .about("Render the audit report of a crawl")
                .arg(
                    arg!(-c --"crawl" <CRAWL_ID>)
                        .required(true)
                        .help("The crawl to report on")
                        .value_parser(clap::value_parser!(i64)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, markdown")
                        .value_parser(["text", "json", "markdown"])
                        .default_value("text"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"include-pages")
                        .required(false)
                        .help("List every stored page with its status")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("trend")
                .about("Compare a client's two most recent audits")
                .arg(
                    arg!(-c --"client" <CLIENT_ID>)
                        .required(true)
                        .value_parser(clap::value_parser!(i64)),
                ),
        )
        .subcommand(
            command!("issue")
                .about("Inspect and triage audit issues")
                .subcommand_required(true)
                .subcommand(
                    command!("list").about("List the issues of an audit").arg(
                        arg!(-a --"audit" <AUDIT_ID>)
                            .required(true)
                            .value_parser(clap::value_parser!(i64)),
                    ),
                )
                .subcommand(
                    command!("set-status")
                        .about("Move an issue through its workflow")
                        .arg(
                            arg!(-i --"id" <ISSUE_ID>)
                                .required(true)
                                .value_parser(clap::value_parser!(i64)),
                        )
                        .arg(
                            arg!(-s --"status" <STATUS>)
                                .required(true)
                                .help("One of: open, in_progress, fixed, ignored")
                                .value_parser(parse_issue_status),
                        ),
                ),
        )
}
