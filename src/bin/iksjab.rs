/*
** This file is a part of Iksemel (XML parser for Jabber/XMPP)
** Copyright (C) 2000-2025 Gurer Ozen
**
** Iksemel is free software: you can redistribute it and/or modify it
** under the terms of the GNU Lesser General Public License as
** published by the Free Software Foundation, either version 3 of
** the License, or (at your option) any later version.
*/

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use iks_xmpp::Jid;
use iks_xmpp::Mux;
use iks_xmpp::xmpp::XmppClient;

/// This tool can communicate over XMPP.
#[derive(Parser, Debug)]
#[command(
    name = "iksjab",
    version,
    after_help = "Report issues at https://github.com/meduketto/iksemel-rust/issues"
)]
struct Args {
    /// Jabber ID to log in with
    #[arg(short, long)]
    jid: Jid,

    /// Server host[:port] to connect instead of the JID domain
    #[arg(short, long)]
    server: Option<String>,

    /// Do not negotiate STARTTLS
    #[arg(long)]
    no_tls: bool,

    /// Connection and response timeout in seconds
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    /// Ping this JID after logging in
    #[arg(short, long)]
    ping: Option<Jid>,
}

fn run(args: Args) -> Result<(), iks_xmpp::Error> {
    let timeout = Duration::from_secs(args.timeout);
    let password = rpassword::prompt_password("Password: ")?;
    let mut client = XmppClient::build(args.jid)
        .server(args.server)
        .connection_timeout(timeout)
        .tls(!args.no_tls)
        .password(&password)
        .connect()?;
    info!(state = %client.session().state(), "logged in");
    if let Some(to) = &args.ping {
        client.serve(Mux::new())?;
        client.ping(to, timeout)?;
        println!("Pong from {to}");
    }
    client.close()
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}
