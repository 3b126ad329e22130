//! Loads a configuration file into the process-wide registry and uses the resulting resources
//! from several threads.

use std::fs;
use std::rc::Rc;
use std::thread;

use allocator_api2::vec::Vec as ResourceVec;
use tiered_memory::{
    Bytes, PolymorphicResource, ResourceAllocator, ResourceGuard, active_resource, align, lookup,
};
use tiered_memory_config::{ConfigError, Loader};

const CONFIG: &str = r#"
[resources.integration_frame]
kind = "linear_chunked"
chunk_size = "16 KiB"
underlying = "integration_quota"

[resources.integration_quota]
kind = "quota"
quota = "1 MiB"

[resources.integration_objects]
kind = "pool"
block_size = 64
alignment = 16
underlying = "integration_quota"
"#;

#[test]
fn configured_resources_serve_every_thread() {
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("memory.toml");
    fs::write(&path, CONFIG).unwrap();

    let labels = Loader::new().load_file(&path).unwrap();
    assert_eq!(labels.len(), 3);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            thread::spawn(|| {
                let _guard = ResourceGuard::named("integration_frame").unwrap();

                let mut values = ResourceVec::new_in(ResourceAllocator::active());
                values.extend(0..100_u32);
                values.iter().sum::<u32>()
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), 4950);
    }

    let objects = lookup("integration_objects").unwrap();
    let block = objects.allocate(Bytes::new(64), align!(16));
    assert!(block.is_aligned(align!(16)));

    // Loading the same file again collides with the registered labels.
    let error = Loader::new().load_file(&path).unwrap_err();
    assert!(matches!(error, ConfigError::DuplicateLabel { .. }));

    // Guards installed on other threads left this thread alone.
    let active: Rc<dyn PolymorphicResource> = active_resource();
    let frame = lookup("integration_frame").unwrap();
    assert_ne!(active.identity(), frame.identity());
}
