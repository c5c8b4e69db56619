use super::transport::OutboundEmail;

pub fn welcome(to: &str, name: &str, app_name: &str) -> OutboundEmail {
    OutboundEmail {
        to: to.to_string(),
        subject: format!("Welcome to {app_name}"),
        body: format!(
            "Hi {name},\n\n\
             Your {app_name} account for {to} is ready. You can sign in at any time \
             with the password you chose.\n\n\
             If you did not create this account, you can ignore this message.\n\n\
             The {app_name} team\n"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_addresses_the_new_user() {
        let email = welcome("a@x.com", "Ada", "authgate");
        assert_eq!(email.to, "a@x.com");
        assert_eq!(email.subject, "Welcome to authgate");
        assert!(email.body.starts_with("Hi Ada,"));
        assert!(email.body.contains("a@x.com"));
    }
}
