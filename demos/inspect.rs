//! Parse a type descriptor from the command line and print what the engine
//! knows about it.
//!
//! ```text
//! cargo run --example inspect -- '{DJ[D value stamp samples}'
//! cargo run --example inspect -- '#OK=0;#NOK=1;E' '"NOK"'
//! ```
//!
//! An optional second argument is a JSON document that is deserialized into
//! an instance of the type and serialized back through both codecs.

use std::process::ExitCode;

use dynfi::{avro, json, trail, DynType};

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let Some(descriptor) = args.next() else {
        eprintln!("usage: inspect <descriptor> [json-value]");
        return ExitCode::FAILURE;
    };

    let ty = match DynType::parse(&descriptor) {
        Ok(ty) => ty,
        Err(e) => {
            eprintln!("cannot parse '{descriptor}': {e}");
            trail::for_each(|msg| eprintln!("  {msg}"));
            return ExitCode::FAILURE;
        }
    };

    println!("descriptor : {descriptor}");
    println!("size       : {} bytes", ty.size());
    println!("alignment  : {}", ty.alignment());
    println!("trivial    : {}", ty.is_trivial());
    println!();
    print!("{ty}");

    match avro::generate_schema(&ty) {
        Ok(schema) => println!("\nschema     : {schema}"),
        Err(e) => println!("\nschema     : n/a ({e})"),
    }

    if let Some(value) = args.next() {
        let inst = match json::deserialize(&ty, value.as_bytes()) {
            Ok(inst) => inst,
            Err(e) => {
                eprintln!("cannot deserialize '{value}': {e}");
                trail::for_each(|msg| eprintln!("  {msg}"));
                return ExitCode::FAILURE;
            }
        };
        match json::serialize(&inst) {
            Ok(text) => println!("json       : {text}"),
            Err(e) => println!("json       : n/a ({e})"),
        }
        match avro::serialize(&inst) {
            Ok(wire) => {
                let hex: Vec<String> = wire.iter().map(|b| format!("{b:02x}")).collect();
                println!("wire       : {} bytes [{}]", wire.len(), hex.join(" "));
            }
            Err(e) => println!("wire       : n/a ({e})"),
        }
    }

    ExitCode::SUCCESS
}
