//! `lwm2m-lifecycle` command line interface.
//!
//! Provisions an in-memory client object store the same way a device would be
//! provisioned in the factory, then reports what the lifecycle engine derives
//! from it: the known servers, the PSK credentials the secure transport would
//! use, the registration link description and the first lifecycle decision.

use std::{process, sync::Arc};

use clap::{
    crate_authors, crate_description, crate_name, crate_version, value_t, App, AppSettings::*, Arg,
};
use console::style;
use hexplay::HexViewBuilder;
use log::{debug, log_enabled, trace, Level::Debug, LevelFilter};
use simplelog::*;

use lwm2m_lifecycle::{self as lc, ObjectInstance, ObjectStore, ResourceValue};

fn main() {
    println!("[LC] lwm2m-lifecycle v{}", crate_version!());

    let matches = App::new(crate_name!())
        .version(format!("v{}", crate_version!()).as_str())
        .author(crate_authors!())
        .about(crate_description!())
        .long_about(
            "\n\
            Provisions the Security and Server objects of an LWM2M client \
            from the command line and reports what the registration engine \
            would do with them:\n\
               \t* the bootstrap and device management servers found \n\
               \t* the PSK identity presented to each server \n\
               \t* the object links sent when registering \n\
               \t* whether the client would register or bootstrap first \n\
            \n\
            Nothing is sent on the network.\
        ",
        )
        .max_term_width(80)
        .setting(ColoredHelp)
        .setting(NextLineHelp)
        .arg(
            Arg::with_name("ENDPOINT")
                .help("the endpoint client name")
                .short("-e")
                .long("--endpoint")
                .takes_value(true)
                .default_value("lwm2m-client")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("DM_URI")
                .help("device management server URI")
                .long_help(
                    "device management server URI, `coap://host[:port]` or \
                     `coaps://host[:port]`",
                )
                .long("--dm-uri")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("SHORT_ID")
                .help("short server id of the device management server")
                .long("--short-id")
                .takes_value(true)
                .default_value("1")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("LIFETIME")
                .help("registration lifetime in seconds")
                .short("-l")
                .long("--lifetime")
                .takes_value(true)
                .default_value("300")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BINDING")
                .help("transport binding mode")
                .short("-b")
                .long("--binding")
                .takes_value(true)
                .possible_values(&["U", "UQ", "S", "SQ", "US", "UQS"])
                .default_value("U")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("BS_URI")
                .help("bootstrap server URI")
                .long("--bs-uri")
                .takes_value(true)
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PSK_IDENTITY")
                .help("PSK identity for the device management server")
                .long("--psk-identity")
                .takes_value(true)
                .requires("PSK_KEY")
                .require_equals(true),
        )
        .arg(
            Arg::with_name("PSK_KEY")
                .help("PSK secret key, hex encoded")
                .long("--psk-key")
                .takes_value(true)
                .requires("PSK_IDENTITY")
                .require_equals(true),
        )
        .arg(Arg::with_name("v").short("v").multiple(true).help(
            "Sets the logging level of verbosity, repeat several times for \
                higher verbosity",
        ))
        .get_matches();

    // Vary the output based on how many times the user used the "verbose" flag
    // (i.e. 'lwm2m-lifecycle -v -v -v' or 'lwm2m-lifecycle -vvv' vs '-v'
    let log_level = match matches.occurrences_of("v") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    if TermLogger::init(log_level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto).is_err() {
        eprintln!("[LC] logging unavailable");
    }

    trace!("{:#?}", matches);

    // Arguments with default values ===========================================

    let short_id = value_t!(matches.value_of("SHORT_ID"), u16)
        .unwrap_or_else(|_| bad_number("short-id", matches.value_of("SHORT_ID")));
    let lifetime = value_t!(matches.value_of("LIFETIME"), u64)
        .unwrap_or_else(|_| bad_number("lifetime", matches.value_of("LIFETIME")));
    let binding = matches.value_of("BINDING").unwrap_or("U");
    let endpoint = matches.value_of("ENDPOINT").unwrap_or("lwm2m-client");

    // Provisioning ============================================================

    let store = Arc::new(lc::MemoryStore::new());
    store.host(lc::SECURITY_ID);
    store.host(lc::SERVER_ID);
    store.put(
        lc::DEVICE_ID,
        ObjectInstance::new(0).with(0, ResourceValue::String(endpoint.into())),
    );

    if let Some(uri) = matches.value_of("BS_URI") {
        store.put_security(0, lc::Security::no_sec_bootstrap(uri));
    }

    if let Some(uri) = matches.value_of("DM_URI") {
        let security = match (
            matches.value_of("PSK_IDENTITY"),
            matches.value_of("PSK_KEY"),
        ) {
            (Some(identity), Some(key)) => {
                let key = hex::decode(key).unwrap_or_else(|e| {
                    println!(
                        "{}: `{}` is not a valid hex key: {}",
                        style("error").red(),
                        style("psk-key").cyan(),
                        e
                    );
                    process::exit(-1);
                });
                lc::Security::psk(uri, short_id, identity.as_bytes(), &key)
            }
            _ => lc::Security::no_sec(uri, short_id),
        };
        store.put_security(1, security);
        store.put_server(0, lc::Server::new(short_id, lifetime, binding));
    }

    // Report ==================================================================

    let servers = match lc::extract(store.as_ref()) {
        Some(servers) => servers,
        None => {
            println!("{}", style("[LC] 💥 client is not configured").red());
            process::exit(1);
        }
    };
    debug!("{:#?}", servers);

    let psk = lc::PskStore::new(store.clone());

    for bs in &servers.bootstraps {
        println!(
            "[LC] 🥾 bootstrap server {} ({})",
            style(&bs.uri).green(),
            describe_address(bs)
        );
    }
    for dm in &servers.device_managements {
        println!(
            "[LC] 🛰  device management server {} ({}) lifetime={} binding={}",
            style(&dm.info.uri).green(),
            describe_address(&dm.info),
            dm.lifetime
                .map_or_else(|| "?".to_string(), |lifetime| format!("{}s", lifetime)),
            dm.binding.map_or("?", |binding| binding.as_str()),
        );
        if let Some(identity) = dm.info.address.and_then(|address| psk.identity(&address)) {
            println!(
                "[LC] 🔑 psk identity `{}`",
                style(String::from_utf8_lossy(&identity)).cyan()
            );
            if log_enabled!(Debug) {
                if let Some(key) = psk.key(&identity) {
                    let view = HexViewBuilder::new(&key)
                        .address_offset(0)
                        .row_width(16)
                        .finish();
                    println!("{}", view);
                }
            }
        }
    }

    println!(
        "[LC] 🔗 object links {}",
        style(lc::object_links(store.as_ref())).dim()
    );

    let exit_code = match servers.device_management() {
        Ok(dm) if dm.is_usable() => {
            println!(
                "[LC] 👍 would register `{}` with {}",
                endpoint,
                style(&dm.info.uri).green()
            );
            0
        }
        Ok(_) | Err(lc::Error::Unconfigured(_)) => match servers.bootstrap() {
            Some(bs) if bs.address.is_some() => {
                println!(
                    "[LC] 👍 would bootstrap `{}` with {}",
                    endpoint,
                    style(&bs.uri).green()
                );
                0
            }
            _ => {
                println!(
                    "{}",
                    style("[LC] ❌ no usable server, the client would stay unregistered").red()
                );
                1
            }
        },
        Err(e) => {
            println!("{} {}", style("[LC] 💥").red(), e);
            1
        }
    };

    debug!("{} objects hosted", store.object_ids().len());
    debug!("exit code: {}", exit_code);
    process::exit(exit_code);
}

fn describe_address(server: &lc::ServerInfo) -> String {
    match server.address {
        Some(address) => address.to_string(),
        None => "unresolved".into(),
    }
}

fn bad_number<T>(name: &str, value: Option<&str>) -> T {
    println!(
        "{}: `{}` needs to be a numeric value",
        style("error").red(),
        style(name).cyan()
    );
    println!(
        "   {} `{}` is not a valid value",
        style("-->").cyan(),
        style(value.unwrap_or_default()).on_red()
    );
    process::exit(-1);
}
