use pxflood::entry;
use pxflood::error::AppResult;

fn main() -> AppResult<()> {
    entry::run()
}
