use console::Style;
use gsnap_core::demod::{BadPixelPolicy, OffPairing};
use gsnap_core::pipeline::config::{OutputMode, ReductionConfig};

struct Styles {
    title: Style,
    label: Style,
    value: Style,
    method: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_reduction_summary(config: &ReductionConfig) {
    let s = Styles::new();
    let r = &config.reduction;

    println!();
    println!("  {}", s.title.apply_to("Chop/Nod Reduction"));
    println!();
    println!(
        "  {:<14}{}",
        s.label.apply_to("Raw data"),
        s.path.apply_to(r.raw_data_path.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(format!("{}-{}", r.data.start, r.data.end))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Chop / nod"),
        s.value
            .apply_to(format!("{} Hz / {} Hz", r.chop_freq, r.nod_freq))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Pairing"),
        s.method.apply_to(match r.pairing {
            OffPairing::Nearest => "nearest off frame",
            OffPairing::BracketMean => "bracketing off mean",
        })
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Bad pixels"),
        s.method.apply_to(match r.bad_pixels {
            BadPixelPolicy::Exclude => "exclude",
            BadPixelPolicy::Interpolate => "interpolate",
        })
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Output"),
        s.method.apply_to(match r.output {
            OutputMode::Frames => "one file per reduced frame",
            OutputMode::Coadd => "single coadd",
        })
    );
    if config.computing.save_mem {
        let cap = config
            .computing
            .max_frames_inmem
            .map(|n| format!("max {} frames in memory", n))
            .unwrap_or_else(|| "unbounded".to_string());
        println!("  {:<14}{}", s.label.apply_to("Memory"), s.value.apply_to(cap));
    }
    println!();
}
