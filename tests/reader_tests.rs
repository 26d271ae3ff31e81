use staged_logger::{Config, DecodeError, LogLevel, LogReader, Logger, SiteInfo};

#[test]
fn test_dictionary_precedes_every_reference() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dict.log");
    let config = Config::default()
        .with_staging_buffer_size(4096)
        .with_output_buffer_size(8192)
        .with_log_file(&path);
    let logger = Logger::new(config).unwrap();

    let producer = logger.producer();

    // Sites registered in waves, interleaved with records, so dictionary
    // entries land in several flushes.
    let mut sites = Vec::new();
    for wave in 0..5u32 {
        for n in 0..3u32 {
            let site = logger.register_site(SiteInfo {
                severity: LogLevel::Debug,
                file: "reader_tests.rs",
                line: wave * 10 + n,
                format: "wave event {}",
            });
            sites.push(site);
        }
        for site in &sites {
            producer.record(*site, &wave.to_le_bytes());
        }
        logger.sync();
    }

    let data = std::fs::read(&path).unwrap();
    let mut reader = LogReader::new(&data);
    let mut entries = 0;
    loop {
        // read_entry fails with UnknownSite if any record precedes its
        // dictionary entry.
        match reader.read_entry() {
            Ok(Some(entry)) => {
                assert!(reader.site(entry.site_id).is_some());
                entries += 1;
            }
            Ok(None) => break,
            Err(e) => panic!("stream violated dictionary ordering: {e}"),
        }
    }
    assert_eq!(entries, 3 + 6 + 9 + 12 + 15);
    assert_eq!(reader.sites().len(), 15);
}

#[test]
fn test_decoded_sites_carry_registration_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta.log");
    let logger = Logger::new(Config::default().with_log_file(&path)).unwrap();

    let warn_site = logger.register_site(SiteInfo {
        severity: LogLevel::Warning,
        file: "connection.rs",
        line: 321,
        format: "retrying {} after {} ms",
    });
    let error_site = logger.register_site(SiteInfo {
        severity: LogLevel::Error,
        file: "connection.rs",
        line: 400,
        format: "gave up on {}",
    });

    let producer = logger.producer();
    producer.record(warn_site, b"peer-a");
    producer.record(error_site, b"peer-b");
    logger.sync();

    let data = std::fs::read(&path).unwrap();
    let mut reader = LogReader::new(&data);

    let first = reader.read_entry().unwrap().unwrap();
    let site = reader.site(first.site_id).unwrap();
    assert_eq!(site.severity, LogLevel::Warning);
    assert_eq!(site.file, "connection.rs");
    assert_eq!(site.line, 321);
    assert_eq!(site.format, "retrying {} after {} ms");

    let second = reader.read_entry().unwrap().unwrap();
    let site = reader.site(second.site_id).unwrap();
    assert_eq!(site.severity, LogLevel::Error);
    assert_eq!(site.line, 400);
}

#[test]
fn test_garbage_stream_is_rejected() {
    let garbage = [0x7fu8, 1, 2, 3];
    let mut reader = LogReader::new(&garbage);
    assert!(matches!(
        reader.read_entry(),
        Err(DecodeError::UnknownTag(0x7f, 0))
    ));
}
