use std::{future::Future, path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use chemnitz_explorer::{
    api::{Backend, SearchFilters, SiteQuery, SitesNearQuery, SortOrder},
    auth::AuthService,
    config::Config,
    errors::{ApiError, ConfigError, SessionError},
    fetch::FetchState,
    filters::{FilterState, LayerToggles, SourceType},
    http::ApiClient,
    map::{MapScene, MarkerKind},
    models::{Category, CulturalSite, ParkingLot, ParkingType, Registration},
    parking::DEFAULT_RADIUS_KM,
    resources::{self, NearbyRequest},
    search::{self, SearchState, MIN_QUERY_CHARS},
    session::{FileStore, Session},
    tracing::setup_tracing,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "chemnitz-explorer",
    about = "Browse Chemnitz cultural sites, parking and districts from the command line"
)]
struct Cli {
    /// Backend root url
    #[arg(long, env = "EXPLORER_API_URL")]
    api_url: Option<String>,

    /// Where the login session is kept between runs
    #[arg(long, env = "EXPLORER_SESSION_PATH")]
    session_path: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Print raw JSON instead of one line per record
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and keep the session
    Login {
        email: String,
        #[arg(long, env = "EXPLORER_PASSWORD")]
        password: String,
    },
    /// Create an account and log in
    Register {
        email: String,
        #[arg(long, env = "EXPLORER_PASSWORD")]
        password: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
    },
    Logout,
    /// Show the logged in user, checking the stored token with the backend
    Whoami,
    /// List cultural sites
    Sites(SiteArgs),
    /// Show one cultural site
    Site { id: String },
    /// Cultural sites around a point
    Near {
        lat: f64,
        lng: f64,
        /// metres
        #[arg(long)]
        max_distance: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Popular {
        #[arg(long)]
        category: Option<Category>,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// List parking lots
    Parking {
        #[arg(long = "type")]
        parking_types: Vec<ParkingType>,
        #[arg(long)]
        district: Option<String>,
    },
    /// Parking lots near the matching cultural sites
    NearbyParking {
        #[command(flatten)]
        sites: SiteArgs,
        #[arg(long, default_value_t = DEFAULT_RADIUS_KM)]
        radius_km: f64,
        #[arg(long = "type")]
        parking_types: Vec<ParkingType>,
    },
    Districts {
        /// only print the names
        #[arg(long)]
        names: bool,
    },
    Categories,
    Stats,
    /// Values the advanced search accepts
    FilterValues,
    /// Name suggestions for a partial query
    Autocomplete { query: String },
    /// Search with filters, sorting and pagination
    Search(SearchArgs),
    Favorites {
        #[command(subcommand)]
        action: Option<FavoritesAction>,
    },
    /// Summarize what the map would show for the given filters
    Map {
        #[command(flatten)]
        sites: SiteArgs,
        #[arg(long = "type")]
        parking_types: Vec<ParkingType>,
        /// also look up parking around every site and connect them
        #[arg(long)]
        connections: bool,
    },
}

#[derive(Subcommand)]
enum FavoritesAction {
    List,
    Add { site_id: String },
    Remove { site_id: String },
    Check { site_id: String },
}

#[derive(Args)]
struct SiteArgs {
    #[arg(long)]
    search: Option<String>,
    /// repeat to select several categories
    #[arg(long)]
    category: Vec<Category>,
    #[arg(long, default_value = "all")]
    source: SourceType,
    #[arg(long)]
    district: Option<String>,
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long)]
    skip: Option<u32>,
}

impl SiteArgs {
    fn filters(&self) -> FilterState {
        let mut filters = FilterState {
            search: self.search.clone().unwrap_or_default(),
            source: self.source,
            categories: self.category.iter().copied().collect(),
            ..Default::default()
        };
        filters.set_district(self.district.as_deref());
        filters
    }
}

#[derive(Args)]
struct SearchArgs {
    query: String,
    #[arg(long)]
    category: Option<Category>,
    #[arg(long)]
    district: Option<String>,
    #[arg(long, default_value = "all")]
    source: SourceType,
    #[arg(long)]
    has_website: bool,
    #[arg(long)]
    has_phone: bool,
    #[arg(long)]
    has_opening_hours: bool,
    #[arg(long)]
    sort_by: Option<String>,
    #[arg(long)]
    desc: bool,
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long)]
    skip: Option<u32>,
}

impl SearchArgs {
    fn filters(&self) -> SearchFilters {
        SearchFilters {
            category: self.category,
            district: self.district.clone(),
            source: self.source.as_param().map(str::to_string),
            has_website: self.has_website.then_some(true),
            has_phone: self.has_phone.then_some(true),
            has_opening_hours: self.has_opening_hours.then_some(true),
            sort_by: self.sort_by.clone(),
            sort_order: self.desc.then_some(SortOrder::Desc),
            limit: self.limit,
            skip: self.skip,
        }
    }
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("could not print output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("{0}")]
    Failed(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = setup_tracing(config.log_dir.as_deref());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    match run(cli, config, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!(error = ?e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    let mut config = Config::from_env()?;
    if let Some(url) = &cli.api_url {
        config.api_url = url.clone();
    }
    if let Some(path) = &cli.session_path {
        config.session_path = path.clone();
    }
    if let Some(secs) = cli.timeout {
        config.request_timeout = Duration::from_secs(secs.max(1));
    }
    Ok(config)
}

async fn run(cli: Cli, config: Config, cancel: CancellationToken) -> Result<(), CliError> {
    let session = Arc::new(Session::new(FileStore::open(&config.session_path)?));
    let client = ApiClient::new(&config, session.clone())?;
    let backend: Arc<dyn Backend> = Arc::new(client);
    let auth = AuthService::new(backend.clone(), session);
    let json = cli.json;

    debug!(api_url = %config.api_url, "starting");

    match cli.command {
        Command::Login { email, password } => {
            let user = auth.login(&email, &password, &cancel).await?;
            println!("logged in as {} {} <{}>", user.first_name, user.last_name, user.email);
        }
        Command::Register {
            email,
            password,
            first_name,
            last_name,
        } => {
            let registration = Registration {
                email,
                password,
                first_name,
                last_name,
            };
            let user = auth.register(&registration, &cancel).await?;
            println!("registered and logged in as {}", user.email);
        }
        Command::Logout => {
            auth.logout()?;
            println!("logged out");
        }
        Command::Whoami => match auth.restore(&cancel).await? {
            Some(user) if json => print_json(&user)?,
            Some(user) => println!(
                "{} {} <{}>{}",
                user.first_name,
                user.last_name,
                user.email,
                if user.is_admin { " (admin)" } else { "" }
            ),
            None => println!("not logged in"),
        },
        Command::Sites(args) => {
            let filters = args.filters();
            let sites = load_sites(&backend, &args, &filters, &cancel).await?;
            print_sites(&filters.filter_sites(&sites, &[]), json)?;
        }
        Command::Site { id } => {
            let site = backend.cultural_site(&id, &cancel).await?;
            print_sites(&[&site], json)?;
        }
        Command::Near {
            lat,
            lng,
            max_distance,
            limit,
        } => {
            let query = SitesNearQuery {
                lat,
                lng,
                max_distance,
                limit,
            };
            let sites = backend.sites_near(&query, &cancel).await?;
            print_sites(&sites.iter().collect::<Vec<_>>(), json)?;
        }
        Command::Popular { category, limit } => {
            let sites = backend.popular_sites(category, limit, &cancel).await?;
            print_sites(&sites.iter().collect::<Vec<_>>(), json)?;
        }
        Command::Parking {
            parking_types,
            district,
        } => {
            let mut filters = FilterState {
                parking_types: parking_types.into_iter().collect(),
                ..Default::default()
            };
            filters.set_district(district.as_deref());

            let lots = resources::parking_lots(backend.clone());
            lots.set_query(filters.to_parking_query());
            let lots = settle(lots.settled(), &cancel).await?;
            print_lots(&filters.filter_lots(&lots), json)?;
        }
        Command::NearbyParking {
            sites: args,
            radius_km,
            parking_types,
        } => {
            let mut filters = args.filters();
            filters.parking_types = parking_types.into_iter().collect();
            let sites = load_sites(&backend, &args, &filters, &cancel).await?;

            let nearby = resources::nearby_parking(backend.clone());
            nearby.set_deps(NearbyRequest {
                sites: filters.filter_sites(&sites, &[]).into_iter().cloned().collect(),
                options: filters.nearby_options(radius_km),
            });
            let nearby = settle(nearby.settled(), &cancel).await?;

            if json {
                print_json(&nearby.parking_lots)?;
            } else {
                print_lots(&nearby.parking_lots.iter().collect::<Vec<_>>(), false)?;
                for connection in &nearby.connections {
                    println!(
                        "  {} -> {} ({:.0} m)",
                        connection.site_id, connection.parking_id, connection.distance_m
                    );
                }
            }
        }
        Command::Districts { names } if names => {
            let districts = resources::district_names(backend.clone());
            districts.set_query(());
            let districts = settle(districts.settled(), &cancel).await?;
            if json {
                print_json(&districts)?;
            } else {
                districts.iter().for_each(|d| println!("{}", d.name));
            }
        }
        Command::Districts { .. } => {
            let districts = resources::districts(backend.clone());
            districts.set_query(());
            let districts = settle(districts.settled(), &cancel).await?;
            if json {
                print_json(&districts)?;
            } else {
                for district in &districts {
                    println!(
                        "{:<32} {:>4} sites",
                        district.display_name(),
                        district.cultural_sites_count
                    );
                }
            }
        }
        Command::Categories => {
            let categories = resources::categories(backend.clone());
            categories.set_query(());
            let categories = settle(categories.settled(), &cancel).await?;
            if json {
                print_json(&categories)?;
            } else {
                for category in &categories {
                    println!(
                        "{:<12} {:>5}",
                        category.name,
                        category.count.map(|c| c.to_string()).unwrap_or_default()
                    );
                }
            }
        }
        Command::Stats => {
            let stats = resources::quick_stats(backend.clone());
            stats.set_query(());
            let stats = settle(stats.settled(), &cancel).await?;
            if json {
                print_json(&stats)?;
            } else {
                println!("cultural sites: {}", stats.total_sites);
                println!("  chemnitz:     {}", stats.chemnitz_sites);
                println!("  sachsen:      {}", stats.sachsen_sites);
                println!("parking lots:   {}", stats.total_parking);
                println!("districts:      {}", stats.total_districts);
                for (category, count) in &stats.sites_by_category {
                    println!("  {category:<12} {count}");
                }
            }
        }
        Command::FilterValues => {
            let values = backend.filter_values(&cancel).await?;
            print_json(&values)?;
        }
        Command::Autocomplete { query } => {
            if query.trim().chars().count() < MIN_QUERY_CHARS {
                println!("type at least {MIN_QUERY_CHARS} characters");
                return Ok(());
            }
            let suggestions = search::autocomplete(backend.clone());
            let state = run_search(&suggestions, &query, SearchFilters::default(), &cancel).await?;
            if json {
                print_json(&state.results)?;
            } else {
                for suggestion in &state.results {
                    println!("{:<10} {}", suggestion.category, suggestion.name);
                }
            }
        }
        Command::Search(args) => {
            if args.query.trim().chars().count() < MIN_QUERY_CHARS {
                println!("type at least {MIN_QUERY_CHARS} characters");
                return Ok(());
            }
            let advanced = search::advanced(backend.clone());
            let state = run_search(&advanced, &args.query, args.filters(), &cancel).await?;
            print_sites(&state.results.iter().collect::<Vec<_>>(), json)?;
            if !json {
                let more = state.pagination.map_or(false, |p| p.has_more);
                println!(
                    "{} of {} matches{}",
                    state.results.len(),
                    state.total,
                    if more { ", more available" } else { "" }
                );
            }
        }
        Command::Favorites { action } => match action.unwrap_or(FavoritesAction::List) {
            FavoritesAction::List => {
                let favorites = backend.favorites(&cancel).await?;
                if json {
                    print_json(&favorites)?;
                } else {
                    for favorite in &favorites.favorites {
                        println!(
                            "{:<26} {:<10} {}",
                            favorite.site_id, favorite.site_category, favorite.site_name
                        );
                    }
                }
            }
            FavoritesAction::Add { site_id } => {
                backend.add_favorite(&site_id, &cancel).await?;
                println!("added {site_id}");
            }
            FavoritesAction::Remove { site_id } => {
                backend.remove_favorite(&site_id, &cancel).await?;
                println!("removed {site_id}");
            }
            FavoritesAction::Check { site_id } => {
                let favorite = backend.is_favorite(&site_id, &cancel).await?;
                println!("{}", if favorite { "yes" } else { "no" });
            }
        },
        Command::Map {
            sites: args,
            parking_types,
            connections,
        } => {
            let mut filters = args.filters();
            filters.parking_types = parking_types.into_iter().collect();
            filters.layers = LayerToggles {
                connections,
                ..Default::default()
            };

            // the three loads are independent, any of them may fail on its own
            let sites = resources::cultural_sites(backend.clone());
            let lots = resources::parking_lots(backend.clone());
            let districts = resources::districts(backend.clone());
            sites.set_query(filters.to_site_query());
            lots.set_query(filters.to_parking_query());
            districts.set_query(());
            let (sites, lots, districts) =
                tokio::join!(sites.settled(), lots.settled(), districts.settled());

            let sites = loaded("cultural sites", sites).sites;
            let lots = loaded("parking lots", lots);
            let districts = loaded("districts", districts);

            let nearby = if connections {
                let nearby = resources::nearby_parking(backend.clone());
                nearby.set_deps(NearbyRequest {
                    sites: filters
                        .filter_sites(&sites, &districts)
                        .into_iter()
                        .cloned()
                        .collect(),
                    options: filters.nearby_options(DEFAULT_RADIUS_KM),
                });
                Some(settle(nearby.settled(), &cancel).await?)
            } else {
                None
            };

            let scene = MapScene::build(&filters, &sites, &lots, &districts, nearby.as_ref());
            let count = |kind: MarkerKind| scene.markers.iter().filter(|m| m.kind == kind).count();
            println!("site markers:    {}", count(MarkerKind::Site));
            println!("parking markers: {}", count(MarkerKind::Parking));
            println!(
                "districts:       {} ({} selected)",
                scene.districts.len(),
                scene.districts.iter().filter(|d| d.selected).count()
            );
            println!("connections:     {}", scene.connections.len());
        }
    }

    Ok(())
}

/// waits for a fetch handle, turning its error state back into an error
async fn settle<T>(
    settled: impl Future<Output = FetchState<T>>,
    cancel: &CancellationToken,
) -> Result<T, CliError> {
    let state = tokio::select! {
        _ = cancel.cancelled() => return Err(ApiError::Cancelled.into()),
        state = settled => state,
    };

    match (state.data, state.error) {
        (Some(data), _) => Ok(data),
        (None, Some(error)) => Err(CliError::Failed(error)),
        (None, None) => Err(ApiError::Cancelled.into()),
    }
}

/// partial data is fine for the map, a failed resource is reported and left empty
fn loaded<T: Default>(what: &str, state: FetchState<T>) -> T {
    if let Some(error) = &state.error {
        eprintln!("warning: could not load {what}: {error}");
    }
    state.data.unwrap_or_default()
}

async fn load_sites(
    backend: &Arc<dyn Backend>,
    args: &SiteArgs,
    filters: &FilterState,
    cancel: &CancellationToken,
) -> Result<Vec<CulturalSite>, CliError> {
    let sites = resources::cultural_sites(backend.clone());
    sites.set_query(SiteQuery {
        limit: args.limit,
        skip: args.skip,
        ..filters.to_site_query()
    });
    Ok(settle(sites.settled(), cancel).await?.sites)
}

async fn run_search<R: Clone + Send + Sync + 'static>(
    search: &search::DebouncedSearch<R>,
    query: &str,
    filters: SearchFilters,
    cancel: &CancellationToken,
) -> Result<SearchState<R>, CliError> {
    let query = query.trim().to_string();
    let mut rx = search.subscribe();
    search.search(&query, filters);

    let state = tokio::select! {
        _ = cancel.cancelled() => {
            search.clear_search();
            return Err(ApiError::Cancelled.into());
        }
        state = rx.wait_for(|s| !s.loading && s.query == query) => match state {
            Ok(state) => (*state).clone(),
            Err(_) => search.state(),
        },
    };

    match state.error {
        Some(error) => Err(CliError::Failed(error)),
        None => Ok(state),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_sites(sites: &[&CulturalSite], json: bool) -> Result<(), CliError> {
    if json {
        return print_json(sites);
    }
    for site in sites {
        println!(
            "{:<26} {:<10} {}{}",
            site.id,
            site.category,
            site.name,
            site.address
                .as_deref()
                .map(|a| format!(", {a}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn print_lots(lots: &[&ParkingLot], json: bool) -> Result<(), CliError> {
    if json {
        return print_json(lots);
    }
    for lot in lots {
        println!(
            "{:<26} {:<8} {}{}",
            lot.id,
            lot.parking_type,
            lot.name,
            lot.capacity
                .map(|c| format!(" ({c} spaces)"))
                .unwrap_or_default()
        );
    }
    Ok(())
}
