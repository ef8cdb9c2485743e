// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use flexi_logger::Logger;
use log::error;
use staticd::config::Config;

const DEFAULT_CONFIG_PATH: &str = "server.conf";

fn main() {
    if let Err(e) = Logger::try_with_env_or_str("info").and_then(|l| l.start()) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration from {config_path}: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = staticd::acceptor::run(config) {
        error!("acceptor exited with an error: {e}");
        std::process::exit(1);
    }
}
