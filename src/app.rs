use crate::app_state::{AppState, SharedAppState};
use crate::bluefile::{BlueHeader, HeaderSummary};
use crate::cli::CommandLineArgs;
use crate::cut::{polyline, x_cut, y_cut};
use crate::datasource::{check_file_type, open_data_source, resolve_local};
use crate::encoder::OutputFormat;
use crate::error::SdsError;
use crate::locations::{LocationKind, LocationSummary};
use crate::metrics::{self, TILE_CACHE_LOOKUPS};
use crate::models::{
    self, BrowsePath, CutPath, DirEntry, FileMetaData, FilePath, LinePath, RegionPath,
    RenderQuery, TilePath,
};
use crate::render::{render, tile_region, FileGeometry, RenderRequest};
use crate::source::ByteRangeSource;
use crate::tile_cache::{cache_key, entry_name, EntryKind};
use crate::validated::{ValidatedPath, ValidatedQuery};

use axum::{
    extract::State,
    http::{header, HeaderName, HeaderValue, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tower::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;

/// Headers echoing the geometry and value range of a rendered output.
const EXPOSED_HEADERS: &str =
    "outxsize,outysize,zmin,zmax,filexstart,filexdelta,fileystart,fileydelta,xmin,xmax,ymin,ymax";

/// As [EXPOSED_HEADERS], for cut and line plot output.
const EXPOSED_LINE_HEADERS: &str = "outxsize,outysize,outzsize,zmin,zmax,filexstart,filexdelta,fileystart,fileydelta,xmin,xmax,ymin,ymax";

fn float_header(name: &'static str, value: f64) -> (HeaderName, String) {
    (HeaderName::from_static(name), format!("{:.6}", value))
}

impl IntoResponse for models::Response {
    fn into_response(self) -> Response {
        let meta = &self.metadata;
        let mut headers = vec![
            (header::CONTENT_TYPE, "application/binary".to_string()),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*".to_string()),
            (
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                if self.line {
                    EXPOSED_LINE_HEADERS
                } else {
                    EXPOSED_HEADERS
                }
                .to_string(),
            ),
            (
                HeaderName::from_static("outxsize"),
                meta.outxsize.to_string(),
            ),
            (
                HeaderName::from_static("outysize"),
                meta.outysize.to_string(),
            ),
        ];
        if self.line {
            headers.push((
                HeaderName::from_static("outzsize"),
                meta.outzsize.to_string(),
            ));
        }
        headers.extend([
            float_header("zmin", meta.zmin),
            float_header("zmax", meta.zmax),
            float_header("filexstart", meta.filexstart),
            float_header("filexdelta", meta.filexdelta),
            float_header("fileystart", meta.fileystart),
            float_header("fileydelta", meta.fileydelta),
            float_header("xmin", meta.xmin()),
            float_header("xmax", meta.xmax()),
            float_header("ymin", meta.ymin()),
            float_header("ymax", meta.ymax()),
        ]);
        // Insert rather than append, replacing the content type set for the body.
        let mut response = self.body.into_response();
        for (name, value) in headers {
            if let Ok(value) = HeaderValue::from_str(&value) {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}

/// Initialise the application state and start the cache eviction loops.
pub fn init(args: &CommandLineArgs) -> Result<SharedAppState, SdsError> {
    let state = AppState::new(args)?;
    if let Some(tile_cache) = &state.tile_cache {
        tile_cache.spawn_eviction(
            args.cache_max_bytes,
            Duration::from_secs(args.cache_check_interval),
        );
    }
    Ok(Arc::new(state))
}

/// Returns a [axum::Router] for the SigPlot data service API
///
/// The router is populated with all routes as well as the following middleware:
///
/// * a [tower_http::trace::TraceLayer] for tracing requests and responses
/// * metrics hooks counting requests and responses
///
/// # Arguments
///
/// * `state`: Shared application state
pub fn router(state: SharedAppState) -> Router {
    fn sds() -> Router<SharedAppState> {
        Router::new()
            .route(
                "/tiles/:location/:tile_x_size/:tile_y_size/:dec_x_mode/:dec_y_mode/:tile_x/:tile_y/*file_path",
                get(tile),
            )
            .route(
                "/region/:x1/:y1/:x2/:y2/:outxsize/:outysize/:location/*file_path",
                get(region),
            )
            .route(
                "/cut/rdsxcut/:x1/:y1/:x2/:y2/:outxsize/:outzsize/:location/*file_path",
                get(x_cut_handler),
            )
            .route(
                "/cut/rdsycut/:x1/:y1/:x2/:y2/:outxsize/:outzsize/:location/*file_path",
                get(y_cut_handler),
            )
            .route(
                "/lds/:x1/:x2/:outxsize/:outzsize/:location/*file_path",
                get(line_plot),
            )
            .route("/header/:location/*file_path", get(header_handler))
            .route("/fs", get(list_locations))
            .route("/fs/:location", get(browse))
            .route("/fs/:location/*path", get(browse))
    }

    Router::new()
        .nest("/sds", sds())
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .on_request(metrics::request_counter)
                .on_response(metrics::record_response_metrics),
        )
}

/// The complete service type, with trailing slashes trimmed from request paths.
pub type Service = NormalizePath<Router>;

/// Returns a [crate::app::Service] with all routes and appropriate middleware.
pub fn service(state: SharedAppState) -> Service {
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

/// Run a CPU-bound closure off the async executor.
async fn run_blocking<T, F>(use_rayon: bool, f: F) -> Result<T, SdsError>
where
    F: FnOnce() -> Result<T, SdsError> + Send + 'static,
    T: Send + 'static,
{
    if use_rayon {
        tokio_rayon::spawn(f).await
    } else {
        tokio::task::spawn_blocking(f).await?
    }
}

/// A render job: reads from the source and returns the encoded output with its metadata.
type RenderJob =
    Box<dyn FnOnce(Arc<dyn ByteRangeSource>) -> Result<(Bytes, FileMetaData), SdsError> + Send>;

/// Serve a render through the disk cache.
///
/// # Arguments
///
/// * `state`: Shared application state
/// * `kind`: Kind of output, which selects the cache entry prefix
/// * `location`: Name of the location
/// * `file_path`: File within the location
/// * `uri`: Request URI, which identifies the output in the cache
/// * `memory`: Bytes to reserve while rendering
/// * `job`: The render
async fn cached_render(
    state: &SharedAppState,
    kind: EntryKind,
    location: &str,
    file_path: &str,
    uri: &Uri,
    memory: usize,
    job: RenderJob,
) -> Result<models::Response, SdsError> {
    check_file_type(file_path)?;
    let signature = format!("{}&{}", uri.path(), uri.query().unwrap_or_default());
    let name = entry_name(kind, &cache_key(location, file_path, &signature));
    let line = kind == EntryKind::Line;

    if let Some(tile_cache) = &state.tile_cache {
        if let Some((data, meta)) = tile_cache.get_output(&name).await {
            TILE_CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
            return Ok(models::Response::new(data, meta, line));
        }
        TILE_CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
    }

    let _task_permit = state.resource_manager.task().await?;
    let _mem_permits = state.resource_manager.memory(memory).await?;
    let source = open_data_source(state, location, file_path).await?;
    let (data, meta) = run_blocking(state.args.use_rayon, move || job(source)).await?;

    if let Some(tile_cache) = &state.tile_cache {
        tile_cache.put_output(&name, &data, &meta).await;
    }
    Ok(models::Response::new(data, meta, line))
}

/// Value range for an output: explicit when both bounds are given, estimated when `estimate`
/// is set, otherwise zero.
fn value_range(
    state: &AppState,
    source: &dyn ByteRangeSource,
    geometry: &FileGeometry,
    query: &RenderQuery,
    estimate: bool,
) -> Result<(f64, f64), SdsError> {
    if let Some(range) = query.explicit_range() {
        return Ok(range);
    }
    if !estimate {
        return Ok((0.0, 0.0));
    }
    let budget = usize::try_from(state.args.max_bytes_zminzmax)?;
    let range = state
        .zranges
        .estimate(source, geometry, query.cxmode(), budget)?;
    Ok((range.zmin, range.zmax))
}

fn metadata(geometry: &FileGeometry, zmin: f64, zmax: f64) -> FileMetaData {
    FileMetaData {
        zmin,
        zmax,
        filexstart: geometry.xstart,
        filexdelta: geometry.xdelta,
        fileystart: geometry.ystart,
        fileydelta: geometry.ydelta,
        ..Default::default()
    }
}

/// Render a raster request and describe it.
fn render_raster(
    state: &AppState,
    source: &dyn ByteRangeSource,
    geometry: &FileGeometry,
    request: &RenderRequest,
    query: &RenderQuery,
    estimate: bool,
) -> Result<(Bytes, FileMetaData), SdsError> {
    let (zmin, zmax) = value_range(state, source, geometry, query, estimate)?;
    let palette = state.palettes.get(query.colormap());
    let data = render(source, geometry, request, zmin, zmax, &palette)?;
    let meta = FileMetaData {
        outxsize: request.outxsize,
        outysize: request.outysize,
        xstart: request.xstart,
        xsize: request.xsize,
        ystart: request.ystart,
        ysize: request.ysize,
        ..metadata(geometry, zmin, zmax)
    };
    Ok((data, meta))
}

async fn tile(
    State(state): State<SharedAppState>,
    ValidatedPath(path): ValidatedPath<TilePath>,
    ValidatedQuery(query): ValidatedQuery<RenderQuery>,
    uri: Uri,
) -> Result<models::Response, SdsError> {
    let output = query.output_format()?;
    let memory = path.tile_x_size * path.tile_y_size * 8;
    let job_state = state.clone();
    let job_path = path.clone();
    let job: RenderJob = Box::new(move |source| {
        let source = source.as_ref();
        let header = BlueHeader::parse(source)?;
        let geometry = FileGeometry::raster(&header, query.subsize)?;
        let (dec_x, dec_y) = job_path.decimation();
        let tile = tile_region(
            &geometry,
            job_path.tile_x_size,
            job_path.tile_y_size,
            dec_x,
            dec_y,
            job_path.tile_x,
            job_path.tile_y,
        )?;
        let request = RenderRequest {
            xstart: tile.xstart,
            ystart: tile.ystart,
            xsize: tile.xsize,
            ysize: tile.ysize,
            outxsize: tile.outxsize,
            outysize: tile.outysize,
            transform: query.transform(),
            cxmode: query.cxmode(),
            output,
        };
        render_raster(&job_state, source, &geometry, &request, &query, true)
    });
    let file_path = path.file_path.trim_start_matches('/');
    cached_render(
        &state,
        EntryKind::Raster,
        &path.location,
        file_path,
        &uri,
        memory,
        job,
    )
    .await
}

async fn region(
    State(state): State<SharedAppState>,
    ValidatedPath(path): ValidatedPath<RegionPath>,
    ValidatedQuery(query): ValidatedQuery<RenderQuery>,
    uri: Uri,
) -> Result<models::Response, SdsError> {
    let output = query.output_format()?;
    let (xstart, ystart, xsize, ysize) = path.rectangle();
    let request = RenderRequest {
        xstart,
        ystart,
        xsize,
        ysize,
        outxsize: path.outxsize,
        outysize: path.outysize,
        transform: query.transform(),
        cxmode: query.cxmode(),
        output,
    };
    let memory = request.outxsize * request.outysize * 8;
    let job_state = state.clone();
    let job: RenderJob = Box::new(move |source| {
        let source = source.as_ref();
        let header = BlueHeader::parse(source)?;
        let geometry = FileGeometry::raster(&header, query.subsize)?;
        // Only colour-mapped output needs a value range.
        let estimate = output == OutputFormat::Rgba;
        render_raster(&job_state, source, &geometry, &request, &query, estimate)
    });
    let file_path = path.file_path.trim_start_matches('/');
    cached_render(
        &state,
        EntryKind::Raster,
        &path.location,
        file_path,
        &uri,
        memory,
        job,
    )
    .await
}

/// Which line of a raster a cut reads.
#[derive(Clone, Copy, Debug)]
enum CutAxis {
    X,
    Y,
}

async fn cut(
    state: SharedAppState,
    axis: CutAxis,
    path: CutPath,
    query: RenderQuery,
    uri: Uri,
) -> Result<models::Response, SdsError> {
    let xstart = path.x1.min(path.x2);
    let ystart = path.y1.min(path.y2);
    let xsize = path.x1.abs_diff(path.x2);
    let ysize = path.y1.abs_diff(path.y2);
    match axis {
        CutAxis::X if ysize != 1 => {
            return Err(SdsError::invalid_request(
                "an x cut must span exactly one row",
            ))
        }
        CutAxis::Y if xsize != 1 => {
            return Err(SdsError::invalid_request(
                "a y cut must span exactly one column",
            ))
        }
        _ => (),
    }
    let memory = xsize.max(ysize) * 8;
    let job_state = state.clone();
    let (outxsize, outzsize) = (path.outxsize, path.outzsize);
    let job: RenderJob = Box::new(move |source| {
        let source = source.as_ref();
        let header = BlueHeader::parse(source)?;
        let geometry = FileGeometry::raster(&header, query.subsize)?;
        let values = match axis {
            CutAxis::X => x_cut(source, &geometry, ystart, xstart, xsize, query.cxmode())?,
            CutAxis::Y => y_cut(source, &geometry, xstart, ystart, ysize, query.cxmode())?,
        };
        let (zmin, zmax) = value_range(&job_state, source, &geometry, &query, true)?;
        let data = polyline(&values, outxsize, outzsize, zmin, zmax);
        let meta = FileMetaData {
            outxsize,
            outysize: 1,
            outzsize,
            xstart,
            xsize,
            ystart,
            ysize,
            ..metadata(&geometry, zmin, zmax)
        };
        Ok((data, meta))
    });
    let file_path = path.file_path.trim_start_matches('/');
    cached_render(
        &state,
        EntryKind::Line,
        &path.location,
        file_path,
        &uri,
        memory,
        job,
    )
    .await
}

async fn x_cut_handler(
    State(state): State<SharedAppState>,
    ValidatedPath(path): ValidatedPath<CutPath>,
    ValidatedQuery(query): ValidatedQuery<RenderQuery>,
    uri: Uri,
) -> Result<models::Response, SdsError> {
    cut(state, CutAxis::X, path, query, uri).await
}

async fn y_cut_handler(
    State(state): State<SharedAppState>,
    ValidatedPath(path): ValidatedPath<CutPath>,
    ValidatedQuery(query): ValidatedQuery<RenderQuery>,
    uri: Uri,
) -> Result<models::Response, SdsError> {
    cut(state, CutAxis::Y, path, query, uri).await
}

async fn line_plot(
    State(state): State<SharedAppState>,
    ValidatedPath(path): ValidatedPath<LinePath>,
    ValidatedQuery(query): ValidatedQuery<RenderQuery>,
    uri: Uri,
) -> Result<models::Response, SdsError> {
    let xstart = path.x1.min(path.x2);
    let xsize = path.x1.abs_diff(path.x2);
    let (outxsize, outzsize) = (path.outxsize, path.outzsize);
    let job_state = state.clone();
    let job: RenderJob = Box::new(move |source| {
        let source = source.as_ref();
        let header = BlueHeader::parse(source)?;
        let geometry = FileGeometry::line(&header)?;
        let values = x_cut(source, &geometry, 0, xstart, xsize, query.cxmode())?;
        let (zmin, zmax) = value_range(&job_state, source, &geometry, &query, true)?;
        let data = polyline(&values, outxsize, outzsize, zmin, zmax);
        let meta = FileMetaData {
            outxsize,
            outysize: 1,
            outzsize,
            xstart,
            xsize,
            ystart: 0,
            ysize: 1,
            ..metadata(&geometry, zmin, zmax)
        };
        Ok((data, meta))
    });
    let file_path = path.file_path.trim_start_matches('/');
    cached_render(
        &state,
        EntryKind::Line,
        &path.location,
        file_path,
        &uri,
        xsize * 8,
        job,
    )
    .await
}

async fn header_handler(
    State(state): State<SharedAppState>,
    ValidatedPath(path): ValidatedPath<FilePath>,
) -> Result<Json<HeaderSummary>, SdsError> {
    let file_path = path.file_path.trim_start_matches('/');
    check_file_type(file_path)?;
    let source = open_data_source(&state, &path.location, file_path).await?;
    let summary = run_blocking(state.args.use_rayon, move || {
        HeaderSummary::new(BlueHeader::parse(source.as_ref())?)
    })
    .await?;
    Ok(Json(summary))
}

async fn list_locations(State(state): State<SharedAppState>) -> Json<Vec<LocationSummary>> {
    Json(state.locations.iter().map(Into::into).collect())
}

/// List a directory of a local location, or return the raw bytes of a file.
async fn browse(
    State(state): State<SharedAppState>,
    ValidatedPath(path): ValidatedPath<BrowsePath>,
) -> Result<Response, SdsError> {
    let location = state.locations.find(&path.location)?;
    if let LocationKind::S3 { .. } = location.kind {
        return Err(SdsError::invalid_request(format!(
            "location {} cannot be browsed",
            location.name
        )));
    }
    let full_path = resolve_local(location, &path.path)?;
    if tokio::fs::metadata(&full_path).await?.is_dir() {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&full_path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let kind = if entry.file_type().await?.is_dir() {
                "directory"
            } else {
                "file"
            };
            entries.push(DirEntry {
                filename: entry.file_name().to_string_lossy().to_string(),
                kind: kind.to_string(),
            });
        }
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));
        return Ok(Json(entries).into_response());
    }
    let data = tokio::fs::read(&full_path).await?;
    let content_type = if check_file_type(&path.path).is_ok() {
        "application/bluefile"
    } else {
        "application/binary"
    };
    Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
}
