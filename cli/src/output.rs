//! Output formatting

use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn print<T: Serialize>(&self, data: &T) {
        let value = serde_json::to_value(data).unwrap_or_default();
        match self {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
            }
            OutputFormat::Text => print_text(&value, 0),
        }
    }
}

fn print_text(value: &serde_json::Value, indent: usize) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map {
                if v.is_object() {
                    println!("{:indent$}{}:", "", key, indent = indent);
                    print_text(v, indent + 2);
                } else {
                    println!("{:indent$}{}: {}", "", key, scalar(v), indent = indent);
                }
            }
        }
        other => println!("{:indent$}{}", "", scalar(other), indent = indent),
    }
}

fn scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".into(),
        other => other.to_string(),
    }
}
