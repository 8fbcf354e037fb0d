use crate::cli::CommandLineArgs;
use crate::colormap::PaletteCache;
use crate::error::SdsError;
use crate::locations::Locations;
use crate::resource_manager::ResourceManager;
use crate::s3_client::S3ClientMap;
use crate::tile_cache::TileCache;
use crate::zrange::ZRangeCache;

use std::sync::Arc;

/// Shared application state passed to each request handler.
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Configured data locations.
    pub locations: Locations,

    /// Resource manager.
    pub resource_manager: ResourceManager,

    /// Memoised value ranges.
    pub zranges: ZRangeCache,

    /// Memoised colormap palettes.
    pub palettes: PaletteCache,

    /// Disk cache, when enabled.
    pub tile_cache: Option<TileCache>,

    /// Map of S3 client objects for remote locations.
    pub s3_client_map: S3ClientMap,
}

impl AppState {
    /// Create and return an [AppState].
    pub fn new(args: &CommandLineArgs) -> Result<Self, SdsError> {
        let locations = Locations::load(&args.locations_file)?;
        Self::with_locations(args, locations)
    }

    /// Create an [AppState] with explicitly provided locations.
    pub fn with_locations(args: &CommandLineArgs, locations: Locations) -> Result<Self, SdsError> {
        let task_limit = args
            .thread_limit
            .or_else(|| Some(num_cpus::get().saturating_sub(1).max(1)));
        let memory_limit = args.memory_limit.map(usize::try_from).transpose()?;
        let resource_manager =
            ResourceManager::new(args.connection_limit_remote, memory_limit, task_limit);
        let tile_cache = args
            .use_cache
            .then(|| TileCache::new(&args.cache_location));

        Ok(Self {
            args: args.clone(),
            locations,
            resource_manager,
            zranges: ZRangeCache::new(),
            palettes: PaletteCache::new(),
            tile_cache,
            s3_client_map: S3ClientMap::new(),
        })
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
