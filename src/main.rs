use beacon_scout::{AdvertisementRecord, Config, ScanHandle, ScanService, Upsert};
use std::io::{self, BufRead};

fn print_devices(handle: &ScanHandle) {
    let view = handle.view();
    println!(
        "{} | adapter {} | {} devices",
        if view.is_scanning { "scanning" } else { "idle" },
        view.power_state,
        view.devices.len()
    );
    for device in view.devices.iter() {
        println!(
            "  {:<24} {:<40} {:>4} dBm",
            device.display_name().unwrap_or("<unnamed>"),
            device.identifier,
            device.signal_strength
        );
    }
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{}; using default settings", e);
            Config::default()
        }
    };

    let handle = match ScanService::spawn(config) {
        Ok(handle) => handle,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Latest-device notifications are printed from their own thread so the
    // scan loop never waits on the terminal.
    let (sender, receiver) = crossbeam_channel::unbounded::<(AdvertisementRecord, Upsert)>();
    let printer = std::thread::spawn(move || {
        for (device, outcome) in receiver.iter() {
            let tag = match outcome {
                Upsert::Inserted => "new",
                Upsert::Updated => "upd",
            };
            println!(
                "[{}] {} {} {} dBm",
                tag,
                device.display_name().unwrap_or("<unnamed>"),
                device.identifier,
                device.signal_strength
            );
        }
    });

    let observed = handle.observe_latest(move |device: &AdvertisementRecord, outcome: Upsert| {
        let _ = sender.send((device.clone(), outcome));
    });
    if let Err(e) = observed.and_then(|_| handle.start()) {
        log::error!("{}", e);
    }

    println!("commands: start | stop | refresh | list | log on | log off | quit");
    for line in io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let result = match line.trim() {
            "start" => handle.start(),
            "stop" => handle.stop(),
            "refresh" => handle.refresh(),
            "log on" => handle.set_logging_enabled(true),
            "log off" => handle.set_logging_enabled(false),
            "list" => {
                print_devices(&handle);
                Ok(())
            }
            "quit" | "exit" => break,
            "" => Ok(()),
            other => {
                println!("unknown command: {}", other);
                Ok(())
            }
        };
        if let Err(e) = result {
            log::error!("{}", e);
            break;
        }
    }

    handle.shutdown();
    let _ = printer.join();
}
