use crate::cli::InfoArgs;
use crate::exit_codes;
use crate::output;
use jazlab_nwb::{Dataset, NwbWriter};
use serde::Serialize;

#[derive(Serialize)]
struct SubjectOutput {
    name: &'static str,
    id: &'static str,
    sex: &'static str,
    age: &'static str,
}

#[derive(Serialize)]
struct DatasetOutput {
    name: &'static str,
    subjects: Vec<SubjectOutput>,
}

#[derive(Serialize)]
struct InfoOutput {
    cli_version: String,
    nwb_support: bool,
    output_formats: Vec<&'static str>,
    datasets: Vec<DatasetOutput>,
    platform: String,
    arch: String,
}

pub fn execute(args: InfoArgs) -> i32 {
    let output_formats = NwbWriter::supported_extensions();
    let info = InfoOutput {
        cli_version: env!("CARGO_PKG_VERSION").to_string(),
        nwb_support: output_formats.contains(&"nwb"),
        output_formats,
        datasets: Dataset::all()
            .iter()
            .map(|dataset| DatasetOutput {
                name: dataset.as_str(),
                subjects: dataset
                    .subjects()
                    .iter()
                    .map(|s| SubjectOutput {
                        name: s.name,
                        id: s.id,
                        sex: s.sex,
                        age: s.age,
                    })
                    .collect(),
            })
            .collect(),
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    };

    if args.json {
        return output::print_json(&info, false);
    }

    println!("jazlab-nwb CLI v{}", info.cli_version);
    println!("Platform: {} ({})", info.platform, info.arch);
    println!();
    println!("Output formats: {}", info.output_formats.join(", "));
    if !info.nwb_support {
        println!("  (.nwb needs a build with --features nwb-support)");
    }
    println!();
    println!("Datasets:");
    for dataset in &info.datasets {
        let subjects: Vec<String> = dataset
            .subjects
            .iter()
            .map(|s| format!("{} ({}, {}, {})", s.name, s.id, s.sex, s.age))
            .collect();
        println!("  {:<8} {}", dataset.name, subjects.join(", "));
    }

    exit_codes::SUCCESS
}
