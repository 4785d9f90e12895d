//! Replays an allocation workload against a software device and reports what the pool did with it.
//! Handy for picking a block size before trying it on real hardware.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use log::{error, info, LevelFilter};
use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, TermLogger, TerminalMode, WriteLogger};

use gestalt_memory::config::{load_pool_config, ChunkSearch, PoolConfig, POOL_CONFIG_FILENAME};
use gestalt_memory::memory::{HostDevice, MemoryPool, MemoryPropertyFlags, MemoryRequirements};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Preset {
    Discrete,
    Integrated,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Property {
    DeviceLocal,
    HostVisible,
    HostCoherent,
    HostCached,
}

impl From<Property> for MemoryPropertyFlags {
    fn from(property: Property) -> Self {
        match property {
            Property::DeviceLocal => MemoryPropertyFlags::DEVICE_LOCAL,
            Property::HostVisible => MemoryPropertyFlags::HOST_VISIBLE,
            Property::HostCoherent => MemoryPropertyFlags::HOST_COHERENT,
            Property::HostCached => MemoryPropertyFlags::HOST_CACHED,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "gestalt_memory", about = "Simulates Gestalt's device memory pool")]
struct Args {
    /// RON pool config to start from.
    #[arg(long, default_value = POOL_CONFIG_FILENAME)]
    config: PathBuf,
    /// Overrides the block size from the config, in bytes.
    #[arg(long)]
    block_size: Option<u64>,
    /// Search chunks by request size instead of by whole blocks.
    #[arg(long)]
    precise: bool,
    /// Number of allocations to make.
    #[arg(long, default_value_t = 64)]
    count: u32,
    /// Size of each allocation in bytes.
    #[arg(long, default_value_t = 1024 * 1024)]
    size: u64,
    #[arg(long, default_value_t = 256)]
    alignment: u64,
    /// Required memory properties.
    #[arg(long, value_enum, num_args = 1.., default_values_t = [Property::DeviceLocal])]
    properties: Vec<Property>,
    #[arg(long, value_enum, default_value_t = Preset::Discrete)]
    preset: Preset,
    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

fn init_logging(level: LevelFilter) {
    let mut log_config_builder = ConfigBuilder::default();
    log_config_builder.set_target_level(LevelFilter::Error);
    let log_config = log_config_builder.build();

    let mut loggers: Vec<Box<dyn simplelog::SharedLogger>> = vec![TermLogger::new(
        level,
        log_config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    match File::create("latest.log") {
        Ok(file) => loggers.push(WriteLogger::new(LevelFilter::Debug, log_config, file)),
        Err(e) => eprintln!("Couldn't create latest.log, logging to terminal only: {}", e),
    }
    if let Err(e) = CombinedLogger::init(loggers) {
        eprintln!("Couldn't initialize logging: {}", e);
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.log_level);

    let mut config = if args.config.exists() {
        load_pool_config(&args.config)
    } else {
        PoolConfig::default()
    };
    if let Some(block_size) = args.block_size {
        config.block_size = block_size;
    }
    if args.precise {
        config.chunk_search = ChunkSearch::Precise;
    }
    let config = match config.validated() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    let device = Arc::new(match args.preset {
        Preset::Discrete => HostDevice::discrete_gpu(),
        Preset::Integrated => HostDevice::integrated_gpu(),
    });
    let properties = args
        .properties
        .iter()
        .fold(MemoryPropertyFlags::empty(), |flags, property| {
            flags | MemoryPropertyFlags::from(*property)
        });

    info!(
        "Allocating {} x {} bytes (alignment {}) with {:?}, block size {} bytes, {:?} chunk search",
        args.count, args.size, args.alignment, properties, config.block_size, config.chunk_search
    );

    let pool = MemoryPool::new(device.clone(), config);
    let requirements = MemoryRequirements::new(args.size, args.alignment, u32::MAX);
    let mut failures = 0;
    for i in 0..args.count {
        if let Err(e) = pool.allocate(&requirements, properties) {
            error!("Allocation {} failed: {}", i, e);
            failures += 1;
        }
    }

    let stats = pool.stats();
    for (type_index, type_stats) in stats.per_type.iter() {
        info!(
            "Memory type {}: {} blocks, {} allocations, {} of {} bytes used",
            type_index,
            type_stats.blocks,
            type_stats.allocations,
            type_stats.bytes_used,
            type_stats.bytes_reserved
        );
    }
    let efficiency = if stats.total.bytes_reserved > 0 {
        let resource_bytes = args.size.saturating_mul(u64::from(args.count - failures));
        resource_bytes as f64 / stats.total.bytes_reserved as f64 * 100.0
    } else {
        0.0
    };
    info!(
        "{} allocations succeeded, {} failed, {} device allocations, \
         {:.1}% of reserved memory holds resource data",
        args.count - failures,
        failures,
        device.allocate_calls(),
        efficiency
    );

    let released = pool.release_all();
    info!("Released {} blocks, {} device frees", released, device.free_calls());
}
