use super::{json_pretty, EXIT_SUCCESS};
use kforge_schema::ProfileCatalog;

pub fn run(catalog: &ProfileCatalog, verbose: bool, json: bool) -> Result<u8, String> {
    if json {
        println!("{}", json_pretty(&catalog.all())?);
        return Ok(EXIT_SUCCESS);
    }
    println!("{:<20} {:<20} DESCRIPTION", "ID", "NAME");
    for profile in catalog.all() {
        println!(
            "{:<20} {:<20} {}",
            profile.id, profile.name, profile.description
        );
        if verbose {
            for (key, value) in profile.overrides.iter() {
                println!("    {key}={value}");
            }
            for module in &profile.modules_to_disable {
                println!("    # {module} is not set");
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
