use bay_sites::projection::{equal_area_m2, square_meters_to_acres};
use bay_sites::types::{Cycle, ScoreField};
use bay_sites::{aggregation, analysis, config, export, repository::DatasetRepository};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List cities with both inventory sites and a boundary
    Cities,
    /// Per-tract planned capacity and density for a city
    Tracts {
        #[arg(long)]
        city: String,
        #[arg(long, default_value = "5", value_parser = parse_cycle)]
        cycle: Cycle,
        /// Write the tracts as GeoJSON (relative to the output dir) instead of printing them
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Correlate housing density with a CalEnviroScreen score
    Correlate {
        /// Defaults to every city
        #[arg(long)]
        city: Option<String>,
        #[arg(long, default_value = "5", value_parser = parse_cycle)]
        cycle: Cycle,
        #[arg(long, default_value = "CIscoreP", value_parser = parse_score)]
        score: ScoreField,
        /// Write a CSV (relative to the output dir) instead of printing
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Cities whose pollution tracts extend past the city line
    Discrepancies,
    /// Fifth-cycle sites with a matched building permit
    Permits {
        #[arg(long)]
        city: String,
    },
    /// School districts, parks and opportunity areas within a city
    Overlays {
        #[arg(long)]
        city: String,
    },
    /// Load every dataset and report its size
    Summary,
}

fn parse_cycle(s: &str) -> Result<Cycle, String> {
    let n: u8 = s.parse().map_err(|e| format!("{}", e))?;
    Cycle::try_from(n).map_err(|e| e.to_string())
}

fn parse_score(s: &str) -> Result<ScoreField, String> {
    ScoreField::from_column(s).ok_or_else(|| {
        let known: Vec<&str> = ScoreField::ALL.iter().map(|f| f.column()).collect();
        format!("unknown score '{}', expected one of {}", s, known.join(", "))
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let app_config = config::AppConfig::load_from_file(&cli.config)?;
    let output_dir = app_config.output.dir.clone();
    let repo = DatasetRepository::from_config(app_config);

    match cli.command {
        Commands::Cities => {
            for city in repo.cities()? {
                println!("{}", city);
            }
        }
        Commands::Tracts { city, cycle, out } => {
            let tracts = aggregation::tracts_for_cycle(&repo, &city, cycle)?;
            info!("{} {} cycle: {} tracts", city, cycle, tracts.len());
            match out {
                Some(path) => {
                    let path = output_dir.join(path);
                    export::write_tracts(&path, &tracts)?;
                    println!("Wrote {} tracts to {:?}", tracts.len(), path);
                }
                None => {
                    println!("{:<12} {:>8} {:>10} {:>14} {:>9}", "Tract", "realcap", "acres", "homes/acre", "CIscoreP");
                    for t in &tracts {
                        let score = t.tract.ci_score_p.map(|s| format!("{:.1}", s)).unwrap_or_else(|| "-".into());
                        println!(
                            "{:<12} {:>8} {:>10.1} {:>14.4} {:>9}",
                            t.tract.tract, t.capacity, t.acres, t.homes_per_acre, score
                        );
                    }
                }
            }
        }
        Commands::Correlate { city, cycle, score, out } => {
            let cities = match city {
                Some(city) => vec![city],
                None => repo.cities()?,
            };
            let mut rows = Vec::with_capacity(cities.len());
            for city in cities {
                let correlation = analysis::correlation_with(&repo, &city, cycle, score)?;
                rows.push((city, correlation));
            }
            match out {
                Some(path) => {
                    let path = output_dir.join(path);
                    std::fs::create_dir_all(&output_dir)?;
                    let file = File::create(&path)
                        .with_context(|| format!("Failed to create {:?}", path))?;
                    export::write_correlations(file, cycle, score, &rows)?;
                    println!("Wrote {} correlations to {:?}", rows.len(), path);
                }
                None => export::write_correlations(std::io::stdout(), cycle, score, &rows)?,
            }
        }
        Commands::Discrepancies => {
            for d in analysis::city_tract_discrepancies(&repo)? {
                println!("{} {}", d.city, d.difference());
            }
        }
        Commands::Permits { city } => {
            let sites = analysis::sites_with_development_indicator(&repo, &city)?;
            let permitted = sites.iter().filter(|s| s.permitted).count();
            let capacity: f64 = sites
                .iter()
                .filter(|s| s.permitted)
                .filter_map(|s| s.site.capacity)
                .sum();
            println!(
                "{}: {} of {} fifth cycle sites permitted ({} units of realistic capacity)",
                city,
                permitted,
                sites.len(),
                capacity
            );
        }
        Commands::Overlays { city } => {
            let acres = |g: &geo::MultiPolygon<f64>| square_meters_to_acres(equal_area_m2(g));
            for school in analysis::schools_for(&repo, &city)? {
                println!("school district  {:<40} {:>10.1} acres", school.district_name, acres(&school.geometry));
            }
            let elementary = analysis::elementary_schools_for(&repo, &city)?;
            println!("elementary districts: {}", elementary.len());
            for park in analysis::parks_for(&repo, &city)? {
                let name = park.name.as_deref().unwrap_or("(unnamed)");
                println!("park             {:<40} {:>10.1} acres", name, acres(&park.geometry));
            }
            for area in analysis::opportunity_for(&repo, &city)? {
                let category = area.category.as_deref().unwrap_or("-");
                println!("opportunity      {:<20} {:<19} {:>10.1} acres", area.id, category, acres(&area.geometry));
            }
        }
        Commands::Summary => {
            println!("sites:        {}", repo.sites()?.len());
            println!("pollution:    {}", repo.pollution()?.len());
            println!("boundaries:   {}", repo.boundaries()?.len());
            println!("schools:      {}", repo.schools()?.len());
            println!("parks:        {}", repo.parks()?.len());
            println!("opportunity:  {}", repo.opportunity()?.len());
            println!("walk scores:  {}", repo.walk_scores()?.len());
            println!("matches:      {} cities", repo.matches()?.0.len());
        }
    }

    Ok(())
}
