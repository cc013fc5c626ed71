use colored::Colorize;
use commands::command_argument_builder;
use sitegauge::handlers::{
    handle_client_add, handle_client_list, handle_crawl, handle_init, handle_issue_list,
    handle_issue_set_status, handle_report, handle_serve, handle_trend, load_settings,
};
use sitegauge::{init_tracing, print_banner};

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    if !quiet {
        print_banner();
    }

    let Some((name, primary_command)) = chosen_command.subcommand() else {
        return;
    };

    init_tracing(if quiet { "warn" } else { "info,sitegauge=debug" });

    let settings = match load_settings(&chosen_command) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            std::process::exit(1);
        }
    };

    let result = match (name, primary_command) {
        ("init", args) => handle_init(args, &settings),
        ("client", args) => match args.subcommand() {
            Some(("add", secondary_command)) => handle_client_add(secondary_command, &settings),
            Some(("list", _)) => handle_client_list(&settings),
            _ => unreachable!("clap should ensure we don't get here"),
        },
        ("crawl", args) => handle_crawl(args, &settings).await,
        ("serve", args) => handle_serve(args, &settings).await,
        ("report", args) => handle_report(args, &settings),
        ("trend", args) => handle_trend(args, &settings).await,
        ("issue", args) => match args.subcommand() {
            Some(("list", secondary_command)) => {
                handle_issue_list(secondary_command, &settings).await
            }
            Some(("set-status", secondary_command)) => {
                handle_issue_set_status(secondary_command, &settings).await
            }
            _ => unreachable!("clap should ensure we don't get here"),
        },
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
