use log::{LevelFilter, Metadata, Record};

pub struct Logger;

static LOGGER: Logger = Logger;

impl log::Log for Logger {
	fn enabled(&self, _: &Metadata) -> bool {
		true
	}

	fn log(&self, record: &Record) {
		eprintln!(
			"[{}] {}: {}",
			record.level(),
			record.target(),
			record.args()
		);
	}

	fn flush(&self) {}
}

pub fn init(verbose: bool) {
	log::set_logger(&LOGGER).ok();
	log::set_max_level(if verbose {
		LevelFilter::Debug
	} else {
		LevelFilter::Warn
	});
}
